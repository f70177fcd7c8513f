//! 外设注册表 - 保存当前扫描窗口内发现的外设
//!
//! 按标识去重，保持发现顺序。

use crate::ble::Peripheral;

#[derive(Debug, Default)]
pub struct PeripheralRegistry {
    peripherals: Vec<Peripheral>,
}

impl PeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入新发现的外设
    ///
    /// 已存在相同标识 (忽略大小写) 时不做任何修改并返回 `false`。
    pub fn insert(&mut self, peripheral: Peripheral) -> bool {
        if self
            .peripherals
            .iter()
            .any(|p| p.id.matches(peripheral.id.as_str()))
        {
            return false;
        }
        self.peripherals.push(peripheral);
        true
    }

    /// 按地址查找（忽略大小写）
    pub fn find(&self, address: &str) -> Option<&Peripheral> {
        self.peripherals.iter().find(|p| p.id.matches(address))
    }

    pub fn clear(&mut self) {
        self.peripherals.clear();
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peripheral> {
        self.peripherals.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedups_by_identity() {
        let mut registry = PeripheralRegistry::new();
        assert!(registry.insert(Peripheral::new("A", Some("Printer".into()))));
        assert!(registry.insert(Peripheral::new("B", None)));
        // 同一标识再次发现，即使名称变化也不更新
        assert!(!registry.insert(Peripheral::new("A", Some("Renamed".into()))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("A").unwrap().display_name(), "Printer");
    }

    #[test]
    fn test_insert_ignores_address_case() {
        let mut registry = PeripheralRegistry::new();
        assert!(registry.insert(Peripheral::new("aa:bb:cc:dd:ee:ff", Some("Printer".into()))));
        assert!(!registry.insert(Peripheral::new("AA:BB:CC:DD:EE:FF", None)));

        assert_eq!(registry.len(), 1);
        let found = registry.find("Aa:Bb:Cc:Dd:Ee:Ff").unwrap();
        assert_eq!(found.id.as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(found.display_name(), "Printer");
    }

    #[test]
    fn test_keeps_discovery_order() {
        let mut registry = PeripheralRegistry::new();
        for id in ["C", "A", "B", "A", "C"] {
            registry.insert(Peripheral::new(id, None));
        }
        let ids: Vec<&str> = registry.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["C", "A", "B"]);
    }

    #[test]
    fn test_find_and_clear() {
        let mut registry = PeripheralRegistry::new();
        registry.insert(Peripheral::new("aa:bb:cc:dd:ee:ff", None));

        assert!(registry.find("AA:BB:CC:DD:EE:FF").is_some());
        assert!(registry.find("11:22:33:44:55:66").is_none());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.find("aa:bb:cc:dd:ee:ff").is_none());
    }
}
