use serde::{Deserialize, Serialize};

/// Encoding used when writing a triangle-soup solid.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Binary,
    Ascii,
}

impl Format {
    pub const ALL: [Format; 2] = [Format::Binary, Format::Ascii];

    pub fn name(&self) -> &'static str {
        match self {
            Format::Binary => "Binary STL",
            Format::Ascii => "ASCII STL",
        }
    }
}
