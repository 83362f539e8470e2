//! Region/zone/sub-zone topology tag for a [`Host`](crate::host::Host).

#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct Locality {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub sub_zone: String,
}

impl Locality {
    pub fn new<R, Z, S>(region: R, zone: Z, sub_zone: S) -> Locality
    where
        R: Into<String>,
        Z: Into<String>,
        S: Into<String>,
    {
        Locality {
            region: region.into(),
            zone: zone.into(),
            sub_zone: sub_zone.into(),
        }
    }

    pub fn empty() -> Locality {
        Locality::default()
    }
}
