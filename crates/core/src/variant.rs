use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the marketplace a call is filling a draft for.
///
/// The two variants are symmetric: the user either looks for a mentor or
/// looks for a mentee. The variant decides the vocabulary of a few fields
/// and the name of the counterpart-traits field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    SeekMentor,
    SeekMentee,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::SeekMentor => "seek_mentor",
            Variant::SeekMentee => "seek_mentee",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown variant '{0}', expected 'seek_mentor' or 'seek_mentee'")]
pub struct UnknownVariant(pub String);

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "seek_mentor" | "mentor" => Ok(Variant::SeekMentor),
            "seek_mentee" | "mentee" => Ok(Variant::SeekMentee),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_serialization() {
        assert_eq!(
            serde_json::to_string(&Variant::SeekMentor).unwrap(),
            "\"seek_mentor\""
        );
        let parsed: Variant = serde_json::from_str("\"seek_mentee\"").unwrap();
        assert_eq!(parsed, Variant::SeekMentee);
    }

    #[test]
    fn test_variant_from_str() {
        assert_eq!("mentor".parse::<Variant>().unwrap(), Variant::SeekMentor);
        assert_eq!("Seek-Mentee".parse::<Variant>().unwrap(), Variant::SeekMentee);
        assert!("tutor".parse::<Variant>().is_err());
    }
}
