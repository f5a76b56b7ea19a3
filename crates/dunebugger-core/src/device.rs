//! Devices a user may monitor.
//!
//! A user profile carries its group names as one comma separated string,
//! e.g. `"velasquez"` or `"shop-a, shop-b,shop-c"`. Each name is a bus group
//! and identifies one device.

use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Ordered, de-duplicated list of device group names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceList(Vec<String>);

impl DeviceList {
    /// Parses a comma separated list, trimming blanks and dropping
    /// duplicates and empty entries.
    pub fn parse(list: &str) -> Self {
        Self::from_names(list.split(','))
    }

    /// Builds a list from individual names with the same clean-up as `parse`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut devices: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !devices.iter().any(|d| d == name) {
                devices.push(name.to_string());
            }
        }
        Self(devices)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|d| d == name)
    }

    /// The device selected when nothing else is requested.
    pub fn default_device(&self) -> DomainResult<&str> {
        self.0.first().map(String::as_str).ok_or(DomainError::NoDevices)
    }

    /// Returns `name` if it is one of the configured devices.
    pub fn resolve<'a>(&self, name: &'a str) -> DomainResult<&'a str> {
        if self.contains(name) {
            Ok(name)
        } else {
            Err(DomainError::UnknownDevice {
                name: name.to_string(),
            })
        }
    }
}

impl fmt::Display for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single() {
        let devices = DeviceList::parse("velasquez");
        assert_eq!(devices.iter().collect::<Vec<_>>(), vec!["velasquez"]);
        assert_eq!(devices.default_device().unwrap(), "velasquez");
    }

    #[test]
    fn test_parse_trims_and_dedups() {
        let devices = DeviceList::parse(" shop-a, shop-b,,shop-a ,shop-c ");
        assert_eq!(
            devices.iter().collect::<Vec<_>>(),
            vec!["shop-a", "shop-b", "shop-c"]
        );
        assert_eq!(devices.to_string(), "shop-a,shop-b,shop-c");
    }

    #[test]
    fn test_empty_list() {
        let devices = DeviceList::parse(" , ");
        assert!(devices.is_empty());
        assert_eq!(devices.default_device(), Err(DomainError::NoDevices));
    }

    #[test]
    fn test_resolve() {
        let devices = DeviceList::parse("a,b");
        assert_eq!(devices.resolve("b").unwrap(), "b");
        assert!(matches!(
            devices.resolve("z"),
            Err(DomainError::UnknownDevice { name }) if name == "z"
        ));
    }
}
