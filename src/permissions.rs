//! Radio permissions the host must grant before peripheral mode starts

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Runtime permission required by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BluetoothScan,
    BluetoothAdvertise,
    BluetoothConnect,
}

impl Permission {
    /// Everything a peripheral needs on hosts with runtime Bluetooth grants
    pub const ALL: [Permission; 3] = [
        Permission::BluetoothScan,
        Permission::BluetoothAdvertise,
        Permission::BluetoothConnect,
    ];
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Permission::BluetoothScan => "BLUETOOTH_SCAN",
            Permission::BluetoothAdvertise => "BLUETOOTH_ADVERTISE",
            Permission::BluetoothConnect => "BLUETOOTH_CONNECT",
        };
        f.write_str(name)
    }
}

/// Answers whether the host granted a permission
pub trait PermissionChecker: Send + Sync {
    fn is_granted(&self, permission: Permission) -> bool;

    /// Subset of `required` that is not granted, in order
    fn missing(&self, required: &[Permission]) -> Vec<Permission> {
        required
            .iter()
            .copied()
            .filter(|p| !self.is_granted(*p))
            .collect()
    }
}

/// Set of permissions the host reported as granted
#[derive(Debug, Clone, Default)]
pub struct GrantedPermissions {
    granted: BTreeSet<Permission>,
}

impl GrantedPermissions {
    pub fn new(granted: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(Permission::ALL)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, permission: Permission) {
        self.granted.insert(permission);
    }
}

impl PermissionChecker for GrantedPermissions {
    fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }
}
