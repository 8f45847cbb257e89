use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Image categories the CLI generates for, each with a stock prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageType {
    Character,
    Animal,
    Object,
    Architecture,
}

pub fn default_prompt(kind: ImageType) -> &'static str {
    match kind {
        ImageType::Character => {
            "A detailed portrait of a fantasy character, dramatic lighting, ultra-realistic"
        }
        ImageType::Animal => "A photorealistic image of a wild animal in its natural habitat",
        ImageType::Object => "A high-resolution render of a futuristic object, studio lighting",
        ImageType::Architecture => {
            "A stunning architectural design, modern style, exterior, daylight"
        }
    }
}
