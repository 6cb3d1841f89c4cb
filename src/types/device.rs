//! Enumerated device identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// USB vendor id for Microsoft.
pub const MICROSOFT_VENDOR_ID: u16 = 0x045e;

/// USB product id of the Kinect for Xbox One / Kinect v2 sensor.
pub const KINECT_V2_PRODUCT_ID: u16 = 0x02c4;

/// An attached depth camera as reported by enumeration.
///
/// Identity is the serial number alone: two `Device` values with the same
/// serial refer to the same physical sensor even if a backend reports
/// different USB ids for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub serial_number: String,
    pub product_id: u16,
    pub vendor_id: u16,
}

impl Device {
    pub fn new(serial_number: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self { serial_number: serial_number.into(), product_id, vendor_id }
    }

    /// Shorthand for a Kinect v2 with the given serial.
    pub fn kinect_v2(serial_number: impl Into<String>) -> Self {
        Self::new(serial_number, MICROSOFT_VENDOR_ID, KINECT_V2_PRODUCT_ID)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.serial_number == other.serial_number
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.serial_number.hash(state);
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:04x}:{:04x})", self.serial_number, self.vendor_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_is_serial_only() {
        let a = Device::kinect_v2("1234567890");
        let b = Device::new("1234567890", 0x1234, 0x5678);

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn display_includes_usb_ids() {
        let device = Device::kinect_v2("007");
        assert_eq!(device.to_string(), "007 (045e:02c4)");
    }
}
