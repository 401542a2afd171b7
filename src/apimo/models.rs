use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// page
//  ├── total_items
//  └── properties[]
//       ├── id
//       ├── user { firstname, lastname, email }
//       ├── updated_at
//       ├── address
//       ├── price { value }
//       ├── area { value }
//       ├── latitude / longitude
//       ├── type / subtype
//       ├── rooms / bedrooms
//       ├── city { name, zipcode }
//       ├── country
//       ├── comments[] { language, title, comment }
//       ├── areas[] { type, number }
//       ├── pictures[] { id, url, rank }
//       └── regulations[] { type, value }

#[derive(Debug, Default, Deserialize)]
pub struct ListingPage {
    #[serde(default, deserialize_with = "opt_vec")]
    pub properties: Vec<RawListing>,
    #[serde(default)]
    pub total_items: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub area: Option<Area>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub longitude: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "opt_text")]
    pub property_type: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub subtype: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub rooms: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub bedrooms: Option<i64>,
    #[serde(default)]
    pub city: Option<City>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "opt_vec")]
    pub comments: Vec<Comment>,
    #[serde(default, deserialize_with = "opt_vec")]
    pub areas: Vec<AreaMeasurement>,
    #[serde(default, deserialize_with = "opt_vec")]
    pub pictures: Vec<Picture>,
    #[serde(default, deserialize_with = "opt_vec")]
    pub regulations: Vec<Regulation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(default, deserialize_with = "opt_f64")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Area {
    // Sent as "45,5" by some agencies and as a number by others.
    #[serde(default, deserialize_with = "opt_text")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct City {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_text")]
    pub zipcode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaMeasurement {
    #[serde(rename = "type", default, deserialize_with = "opt_i64")]
    pub area_type: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub number: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Picture {
    #[serde(default, deserialize_with = "opt_text")]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Regulation {
    #[serde(rename = "type", default, deserialize_with = "opt_i64")]
    pub regulation_type: Option<i64>,
    #[serde(default, deserialize_with = "opt_text")]
    pub value: Option<String>,
}

/// Accepts a JSON string or number and keeps its textual form.
fn opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// `null` reads as an empty list.
fn opt_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
