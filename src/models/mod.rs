pub mod assessment;
pub mod communication;
pub mod enums;
pub mod file;
pub mod filters;
pub mod patient;
pub mod user;
pub mod visit;

pub use assessment::*;
pub use communication::*;
pub use enums::*;
pub use file::*;
pub use filters::*;
pub use patient::*;
pub use user::*;
pub use visit::*;

use serde::Serialize;

/// Paged list response: total matching rows plus the requested page.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub count: i64,
    pub results: Vec<T>,
}

/// Deserialize a field that distinguishes "absent" (`None`) from an explicit
/// `null` (`Some(None)`). Use with `#[serde(default, deserialize_with = "nullable")]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    <Option<T> as serde::Deserialize>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        phone: Option<Option<String>>,
    }

    #[test]
    fn nullable_distinguishes_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let cleared: Patch = serde_json::from_str(r#"{"phone": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"phone": "555"}"#).unwrap();
        assert_eq!(absent.phone, None);
        assert_eq!(cleared.phone, Some(None));
        assert_eq!(set.phone, Some(Some("555".into())));
    }
}
