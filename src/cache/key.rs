//! Cache Keys
//!
//! Deterministic identifiers for cached avatars (sources) and generated GIFs
//! (results). The storage form of a key doubles as the base file name in the
//! filesystem backing, so it must parse back into the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Separator between key fields. Never produced by integer formatting.
const FIELD_SEPARATOR: char = '_';

/// Separator inside `AxB` pairs.
const PAIR_SEPARATOR: char = 'x';

// =============================================================================
// Cache Key Trait
// =============================================================================

/// Common behaviour of source and result keys
pub trait CacheKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// String form used as map key and file base name
    fn storage_key(&self) -> String;

    /// Parse the storage form back into a key
    fn from_storage_key(key: &str) -> Option<Self>;

    /// Avatar id this key derives from
    fn source_id(&self) -> &str;
}

// =============================================================================
// Objects
// =============================================================================

/// Visual layers included in a generated GIF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objects {
    Hand,
    Avatar,
    #[default]
    Both,
}

impl Objects {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objects::Hand => "hand",
            Objects::Avatar => "avatar",
            Objects::Both => "both",
        }
    }
}

impl fmt::Display for Objects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Objects {
    type Err = String;

    /// Accepts `hand`, `avatar`, `both`, or a comma list such as `hand,avatar`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hand = false;
        let mut avatar = false;
        for part in s.split(',').map(str::trim) {
            match part {
                "hand" => hand = true,
                "avatar" => avatar = true,
                "both" => {
                    hand = true;
                    avatar = true;
                }
                other => return Err(format!("unknown object '{}'", other)),
            }
        }
        match (hand, avatar) {
            (true, true) => Ok(Objects::Both),
            (true, false) => Ok(Objects::Hand),
            (false, true) => Ok(Objects::Avatar),
            (false, false) => Err("no objects selected".to_string()),
        }
    }
}

// =============================================================================
// Generation Parameters
// =============================================================================

/// Parameters of a generated petpet GIF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetPetParams {
    pub shift_x: i32,
    pub shift_y: i32,
    pub resize_x: i32,
    pub resize_y: i32,
    pub squeeze: i32,
    /// Base avatar size in pixels
    pub size: u32,
    /// Output GIF size in pixels
    pub gif_size: u32,
    pub fps: u32,
    pub objects: Objects,
}

impl Default for PetPetParams {
    fn default() -> Self {
        Self {
            shift_x: 0,
            shift_y: 0,
            resize_x: 0,
            resize_y: 0,
            squeeze: 12,
            size: 100,
            gif_size: 128,
            fps: 16,
            objects: Objects::Both,
        }
    }
}

// =============================================================================
// Result Key
// =============================================================================

/// Key of a generated GIF: source id plus every generation parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    source_id: String,
    params: PetPetParams,
}

impl ResultKey {
    pub fn new(source_id: impl Into<String>, params: &PetPetParams) -> Self {
        Self {
            source_id: source_id.into(),
            params: *params,
        }
    }

    pub fn params(&self) -> &PetPetParams {
        &self.params
    }
}

impl CacheKey for ResultKey {
    fn storage_key(&self) -> String {
        let p = &self.params;
        format!(
            "{id}{s}{sx}{x}{sy}{s}{rx}{x}{ry}{s}{squeeze}{s}{size}{s}{gif}{s}{fps}{s}{objects}",
            id = self.source_id,
            sx = p.shift_x,
            sy = p.shift_y,
            rx = p.resize_x,
            ry = p.resize_y,
            squeeze = p.squeeze,
            size = p.size,
            gif = p.gif_size,
            fps = p.fps,
            objects = p.objects,
            s = FIELD_SEPARATOR,
            x = PAIR_SEPARATOR,
        )
    }

    fn from_storage_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(FIELD_SEPARATOR).collect();
        let [id, shift, resize, squeeze, size, gif_size, fps, objects] = parts.as_slice() else {
            return None;
        };
        if !is_source_id(id) {
            return None;
        }
        let (shift_x, shift_y) = parse_pair(shift)?;
        let (resize_x, resize_y) = parse_pair(resize)?;
        let params = PetPetParams {
            shift_x,
            shift_y,
            resize_x,
            resize_y,
            squeeze: squeeze.parse().ok()?,
            size: size.parse().ok()?,
            gif_size: gif_size.parse().ok()?,
            fps: fps.parse().ok()?,
            objects: match *objects {
                "hand" => Objects::Hand,
                "avatar" => Objects::Avatar,
                "both" => Objects::Both,
                _ => return None,
            },
        };
        Some(Self {
            source_id: (*id).to_string(),
            params,
        })
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

// =============================================================================
// Source Key
// =============================================================================

/// Key of a fetched avatar: id plus the optional requested size
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    id: String,
    size: Option<u32>,
}

impl SourceKey {
    pub fn new(id: impl Into<String>, size: Option<u32>) -> Self {
        Self {
            id: id.into(),
            size,
        }
    }

    pub fn size(&self) -> Option<u32> {
        self.size
    }
}

impl CacheKey for SourceKey {
    fn storage_key(&self) -> String {
        match self.size {
            Some(size) => format!("{}{}s{}", self.id, FIELD_SEPARATOR, size),
            None => self.id.clone(),
        }
    }

    fn from_storage_key(key: &str) -> Option<Self> {
        match key.split_once(FIELD_SEPARATOR) {
            None if is_source_id(key) => Some(Self::new(key, None)),
            Some((id, size)) if is_source_id(id) => {
                let size = size.strip_prefix('s')?.parse().ok()?;
                Some(Self::new(id, Some(size)))
            }
            _ => None,
        }
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Avatar ids are non-empty strings of ASCII digits
pub fn is_source_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

fn parse_pair(pair: &str) -> Option<(i32, i32)> {
    let (a, b) = pair.split_once(PAIR_SEPARATOR)?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> PetPetParams {
        PetPetParams {
            shift_x: 1,
            shift_y: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_result_key_format() {
        let key = ResultKey::new("117378255429959680", &PetPetParams::default());
        assert_eq!(
            key.storage_key(),
            "117378255429959680_0x0_0x0_12_100_128_16_both"
        );
        assert_eq!(key.source_id(), "117378255429959680");
    }

    #[test]
    fn test_result_key_stability() {
        let a = ResultKey::new("42", &baseline());
        let b = ResultKey::new("42", &baseline());
        assert_eq!(a, b);
        assert_eq!(a.storage_key(), b.storage_key());
    }

    #[test]
    fn test_result_key_uniqueness() {
        let base = ResultKey::new("42", &baseline()).storage_key();

        let variants = [
            PetPetParams { shift_x: 2, ..baseline() },
            PetPetParams { shift_y: 3, ..baseline() },
            PetPetParams { resize_x: 1, ..baseline() },
            PetPetParams { resize_y: -1, ..baseline() },
            PetPetParams { squeeze: 20, ..baseline() },
            PetPetParams { size: 80, ..baseline() },
            PetPetParams { gif_size: 256, ..baseline() },
            PetPetParams { fps: 24, ..baseline() },
            PetPetParams { objects: Objects::Hand, ..baseline() },
        ];
        for params in variants {
            assert_ne!(ResultKey::new("42", &params).storage_key(), base);
        }
        assert_ne!(ResultKey::new("43", &baseline()).storage_key(), base);
    }

    #[test]
    fn test_result_key_no_abutting_collision() {
        // ids and numbers that would merge under plain concatenation
        let a = ResultKey::new("1", &PetPetParams { shift_x: 12, ..Default::default() });
        let b = ResultKey::new("11", &PetPetParams { shift_x: 2, ..Default::default() });
        assert_ne!(a.storage_key(), b.storage_key());

        let c = ResultKey::new("1", &PetPetParams { shift_x: -1, shift_y: 2, ..Default::default() });
        let d = ResultKey::new("1", &PetPetParams { shift_x: 1, shift_y: -2, ..Default::default() });
        assert_ne!(c.storage_key(), d.storage_key());
    }

    #[test]
    fn test_result_key_parsing() {
        let params = PetPetParams {
            shift_x: -5,
            shift_y: 20,
            resize_x: 3,
            resize_y: -7,
            squeeze: -2,
            size: 90,
            gif_size: 64,
            fps: 30,
            objects: Objects::Avatar,
        };
        let key = ResultKey::new("987654321", &params);
        let parsed = ResultKey::from_storage_key(&key.storage_key()).unwrap();
        assert_eq!(parsed, key);

        assert!(ResultKey::from_storage_key("987654321").is_none());
        assert!(ResultKey::from_storage_key("abc_0x0_0x0_12_100_128_16_both").is_none());
        assert!(ResultKey::from_storage_key("1_0x0_0x0_12_100_128_16_feet").is_none());
        assert!(ResultKey::from_storage_key("1_00_0x0_12_100_128_16_both").is_none());
    }

    #[test]
    fn test_source_key() {
        let plain = SourceKey::new("42", None);
        assert_eq!(plain.storage_key(), "42");
        assert_eq!(SourceKey::from_storage_key("42"), Some(plain));

        let sized = SourceKey::new("42", Some(256));
        assert_eq!(sized.storage_key(), "42_s256");
        assert_eq!(SourceKey::from_storage_key("42_s256"), Some(sized));

        assert!(SourceKey::from_storage_key("42_256").is_none());
        assert!(SourceKey::from_storage_key("x42").is_none());
        assert!(SourceKey::from_storage_key("").is_none());
    }

    #[test]
    fn test_objects_parsing() {
        assert_eq!("hand".parse::<Objects>().unwrap(), Objects::Hand);
        assert_eq!("avatar".parse::<Objects>().unwrap(), Objects::Avatar);
        assert_eq!("both".parse::<Objects>().unwrap(), Objects::Both);
        assert_eq!("hand,avatar".parse::<Objects>().unwrap(), Objects::Both);
        assert_eq!("avatar, hand".parse::<Objects>().unwrap(), Objects::Both);
        assert!("feet".parse::<Objects>().is_err());
        assert!("".parse::<Objects>().is_err());
    }
}
