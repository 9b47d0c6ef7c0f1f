use serde::{Deserialize, Deserializer};

// Deserialize a float that venues report either as a number or a string,
// e.g. 69.69 or "69.69".
pub fn de_flexi_float<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr<'a> {
        Num(f64),
        Str(&'a str),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(value) => Ok(value),
        NumOrStr::Str(value) => value.parse::<f64>().map_err(serde::de::Error::custom),
    }
}
