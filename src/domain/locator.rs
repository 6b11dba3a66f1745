//! Resource Address Resolver
//!
//! Parses locators of the form `scheme://deviceAddress/serviceId/characteristicId[/extra]`
//! into a typed address. Device addresses are accepted with dash, colon or no
//! separators in any case and normalized to `AA:BB:CC:DD:EE:FF`.

use crate::error::{BindingError, BindingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bluetooth base UUID used to expand 16- and 32-bit short identifiers.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Canonical 48-bit device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Address as the 48-bit integer host stacks use, first octet most significant.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0, |acc, octet| (acc << 8) | u64::from(*octet))
    }

    /// Inverse of [`as_u64`](Self::as_u64); the upper 16 bits are ignored.
    pub fn from_u64(raw: u64) -> Self {
        let bytes = raw.to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..]);
        Self(octets)
    }
}

impl FromStr for DeviceAddress {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        let invalid = |reason: &str| BindingError::AddressResolution {
            locator: s.to_string(),
            reason: reason.to_string(),
        };

        if digits.len() != 12 {
            return Err(invalid("device address must contain 6 hex octets"));
        }

        let mut octets = [0u8; 6];
        hex::decode_to_slice(&digits, &mut octets)
            .map_err(|_| invalid("device address contains non-hex characters"))?;
        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Connection-oriented characteristic access.
    Gatt,
    /// Advertisement data, no connection required.
    Gap,
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gatt" => Ok(Self::Gatt),
            "gap" => Ok(Self::Gap),
            other => Err(format!("unsupported scheme '{other}'")),
        }
    }
}

/// Operation the peripheral supports on a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    WriteWithoutResponse,
    Notify,
}

impl OperationKind {
    /// Parse a method name in any of the accepted vocabularies
    /// (`sbo:write`, `bir:methodName` values, bare names).
    pub fn from_method_name(name: &str) -> Option<Self> {
        let bare = name.rsplit(':').next().unwrap_or(name);
        match bare.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "write-without-response" | "writewithoutresponse" => Some(Self::WriteWithoutResponse),
            "notify" | "indicate" => Some(Self::Notify),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteWithoutResponse => "write-without-response",
            Self::Notify => "notify",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write | Self::WriteWithoutResponse)
    }
}

/// Caller-facing verb of the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    ReadProperty,
    WriteProperty,
    InvokeAction,
    SubscribeEvent,
}

impl Verb {
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "readproperty" => Some(Self::ReadProperty),
            "writeproperty" => Some(Self::WriteProperty),
            "invokeaction" => Some(Self::InvokeAction),
            "subscribeevent" | "observeproperty" => Some(Self::SubscribeEvent),
            _ => None,
        }
    }

    /// Operation used when the description does not name one explicitly.
    pub fn default_operation(&self) -> OperationKind {
        match self {
            Self::ReadProperty => OperationKind::Read,
            Self::WriteProperty => OperationKind::Write,
            Self::InvokeAction => OperationKind::WriteWithoutResponse,
            Self::SubscribeEvent => OperationKind::Notify,
        }
    }
}

/// Parse a service or characteristic identifier.
///
/// Full 128-bit UUIDs are accepted with or without dashes; 16- and 32-bit short
/// forms (`fff0`, `0x2a19`) are expanded against the Bluetooth base UUID.
pub fn parse_uuid(id: &str) -> Option<Uuid> {
    let trimmed = id.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if matches!(short.len(), 4 | 8) {
        if !short.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let value = u32::from_str_radix(short, 16).ok()?;
        return Some(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((value as u128) << 96)));
    }

    Uuid::parse_str(trimmed).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    pub scheme: Scheme,
    pub device: DeviceAddress,
    pub service: Option<Uuid>,
    pub characteristic: Option<Uuid>,
    /// Path segments after the characteristic (or after the device for GAP).
    pub extra: Vec<String>,
    pub operation: Option<OperationKind>,
    pub content_type: Option<String>,
}

impl ResourceLocator {
    /// Parse the textual locator. The operation and content type come from
    /// resource metadata and are attached with the builder methods below.
    pub fn parse(href: &str) -> BindingResult<Self> {
        let invalid = |reason: String| BindingError::AddressResolution {
            locator: href.to_string(),
            reason,
        };

        let (scheme, path) = href
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' separator".into()))?;
        let scheme: Scheme = scheme.parse().map_err(invalid)?;

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let device = segments
            .next()
            .ok_or_else(|| invalid("missing device address".into()))?
            .parse::<DeviceAddress>()
            .map_err(|e| match e {
                BindingError::AddressResolution { reason, .. } => invalid(reason),
                other => other,
            })?;

        match scheme {
            Scheme::Gatt => {
                let service_id = segments
                    .next()
                    .ok_or_else(|| invalid("missing service id".into()))?;
                let characteristic_id = segments
                    .next()
                    .ok_or_else(|| invalid("missing characteristic id".into()))?;
                let service = parse_uuid(service_id)
                    .ok_or_else(|| invalid(format!("invalid service id '{service_id}'")))?;
                let characteristic = parse_uuid(characteristic_id).ok_or_else(|| {
                    invalid(format!("invalid characteristic id '{characteristic_id}'"))
                })?;

                Ok(Self {
                    scheme,
                    device,
                    service: Some(service),
                    characteristic: Some(characteristic),
                    extra: segments.map(str::to_string).collect(),
                    operation: None,
                    content_type: None,
                })
            }
            Scheme::Gap => Ok(Self {
                scheme,
                device,
                service: None,
                characteristic: None,
                extra: segments.map(str::to_string).collect(),
                operation: Some(OperationKind::Read),
                content_type: None,
            }),
        }
    }

    pub fn with_operation(mut self, operation: OperationKind) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Service and characteristic of a GATT locator.
    pub fn gatt_address(&self) -> BindingResult<(Uuid, Uuid)> {
        match (self.service, self.characteristic) {
            (Some(service), Some(characteristic)) => Ok((service, characteristic)),
            _ => Err(BindingError::Operation(format!(
                "locator for {} does not address a GATT characteristic",
                self.device
            ))),
        }
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Gatt => "gatt",
            Scheme::Gap => "gap",
        };
        write!(f, "{scheme}://{}", self.device)?;
        if let Some(service) = self.service {
            write!(f, "/{service}")?;
        }
        if let Some(characteristic) = self.characteristic {
            write!(f, "/{characteristic}")?;
        }
        for segment in &self.extra {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        let a: DeviceAddress = "c0-3c-59-a8-91-06".parse().unwrap();
        let b: DeviceAddress = "C03C59A89106".parse().unwrap();
        let c: DeviceAddress = "c0:3c:59:a8:91:06".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "C0:3C:59:A8:91:06");
    }

    #[test]
    fn test_address_as_integer() {
        let a: DeviceAddress = "C0:3C:59:A8:91:06".parse().unwrap();
        assert_eq!(a.as_u64(), 0xC03C_59A8_9106);
        assert_eq!(DeviceAddress::from_u64(0xC03C_59A8_9106), a);
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("c0:3c:59:a8:91".parse::<DeviceAddress>().is_err());
        assert!("zz:3c:59:a8:91:06".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_parse_uuid_short_forms() {
        let full = parse_uuid("0000fff0-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(parse_uuid("fff0").unwrap(), full);
        assert_eq!(parse_uuid("0xFFF0").unwrap(), full);
        assert!(parse_uuid("1fc8f811-0000-4e89-8476-e0b2dad3179b").is_some());
        assert_eq!(parse_uuid("fff"), None);
        assert_eq!(parse_uuid("+ff0"), None);
        assert_eq!(parse_uuid("+000fff0"), None);
    }

    #[test]
    fn test_parse_gatt_locator() {
        let locator = ResourceLocator::parse(
            "gatt://BE-58-30-00-CC-11/0000fff0-0000-1000-8000-00805f9b34fb/0000fff3-0000-1000-8000-00805f9b34fb",
        )
        .unwrap();
        assert_eq!(locator.scheme, Scheme::Gatt);
        assert_eq!(locator.device.to_string(), "BE:58:30:00:CC:11");
        assert_eq!(locator.service, parse_uuid("fff0"));
        assert_eq!(locator.characteristic, parse_uuid("fff3"));
        assert!(locator.extra.is_empty());
        assert_eq!(locator.operation, None);
    }

    #[test]
    fn test_parse_gap_locator() {
        let locator = ResourceLocator::parse("gap://FC-12-25-CC-CB-9A/manufacturerData/0x0499").unwrap();
        assert_eq!(locator.scheme, Scheme::Gap);
        assert_eq!(locator.extra, vec!["manufacturerData", "0x0499"]);
        assert_eq!(locator.operation, Some(OperationKind::Read));
    }

    #[test]
    fn test_malformed_locators() {
        assert!(matches!(
            ResourceLocator::parse("C0-3C-59-A8-91-06/fff0/fff3"),
            Err(BindingError::AddressResolution { .. })
        ));
        assert!(ResourceLocator::parse("gatt://C0-3C-59-A8-91-06/fff0").is_err());
        assert!(ResourceLocator::parse("http://C0-3C-59-A8-91-06/fff0/fff3").is_err());
        assert!(ResourceLocator::parse("gatt://C0-3C-59-A8-91-06/nothex/fff3").is_err());
    }

    #[test]
    fn test_operation_vocabulary() {
        assert_eq!(OperationKind::from_method_name("sbo:write"), Some(OperationKind::Write));
        assert_eq!(
            OperationKind::from_method_name("write-without-response"),
            Some(OperationKind::WriteWithoutResponse)
        );
        assert_eq!(OperationKind::from_method_name("sbo:notify"), Some(OperationKind::Notify));
        assert_eq!(OperationKind::from_method_name("erase"), None);
        assert_eq!(
            Verb::from_op("invokeaction").unwrap().default_operation(),
            OperationKind::WriteWithoutResponse
        );
    }
}
