use super::Net;
use crate::layers::{FinalLayer, NetLayer};

// Field order must match the derived `Serialize` of `Net`. The activation
// buffers are not stored, they are rebuilt from the layer shapes.
#[derive(serde::Deserialize)]
#[serde(rename = "Net")]
struct StoredNet {
    layers: Vec<Box<dyn NetLayer>>,
    final_layer: Box<dyn FinalLayer>,
}

impl<'de> serde::Deserialize<'de> for Net {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let stored = StoredNet::deserialize(deserializer)?;
        Net::from_layers(stored.layers, stored.final_layer).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        net::{Activation, EndLayer, Layer, Net},
        utils::seeded_rng,
        vol::Vol,
    };

    #[test]
    fn json_round_trip_rebuilds_buffers() {
        let mut rng = seeded_rng(2, 1);
        let mut net = Net::new(
            &[
                Layer::Input {
                    frames: 2,
                    width: 4,
                    height: 4,
                    depth: 1,
                },
                Layer::Lstm { units: 3 },
            ],
            EndLayer::Softmax { classes: 2 },
            &mut rng,
        )
        .unwrap();
        let x = Vol::randn(net.input_shape(), 1.0, &mut rng);
        let expected = net.forward(&x, false).unwrap();

        let json = serde_json::to_string(&net).unwrap();
        let mut restored: Net = serde_json::from_str(&json).unwrap();
        let got = restored.forward(&x, false).unwrap();
        for (a, b) in got.w.iter().zip(&expected.w) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
