use super::{Shape, Vol};
use crate::Float;

// Field order must match the derived `Serialize` of `Vol`, bincode
// relies on it.
#[derive(serde::Deserialize)]
#[serde(rename = "Vol")]
struct StoredVol {
    frames: usize,
    sx: usize,
    sy: usize,
    depth: usize,
    w: Vec<Float>,
}

impl TryFrom<StoredVol> for Vol {
    type Error = String;

    fn try_from(stored: StoredVol) -> Result<Self, Self::Error> {
        let shape = Shape::new(stored.frames, stored.sx, stored.sy, stored.depth);
        if shape.len() != stored.w.len() {
            return Err(format!(
                "vol of shape {shape} cannot hold {} values",
                stored.w.len()
            ));
        }
        // the gradient buffer is never persisted, it comes back zeroed
        Ok(Vol::from_parts(shape, stored.w))
    }
}

impl<'de> serde::Deserialize<'de> for Vol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stored = StoredVol::deserialize(deserializer)?;
        Vol::try_from(stored).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::vol::Vol;

    #[test]
    fn mismatched_length_is_rejected() {
        let json = r#"{"frames": 2, "sx": 1, "sy": 1, "depth": 2, "w": [1.0, 2.0, 3.0]}"#;
        let err = serde_json::from_str::<Vol>(json).unwrap_err();
        assert!(err.to_string().contains("cannot hold 3 values"));
    }
}
