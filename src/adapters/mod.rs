//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements        | Connects to                 |
//! |-------------|-------------------|-----------------------------|
//! | `ble`       | LinkPort          | Bluedroid GATT server       |
//! | `can_bus`   | BusPort           | ESP32 TWAI controller       |
//! | `flash`     | PartitionPort     | OTA partitions / esp-ota    |
//! | `nvs`       | ConfigPort        | NVS / in-memory store       |
//! |             | StoragePort       |                             |
//! | `time`      | Clock, DelayNs    | ESP32 system timer          |
//! | `device_id` |                   | eFuse factory MAC           |
//! | `task`      |                   | FreeRTOS pthread config     |

pub mod ble;
pub mod can_bus;
pub mod device_id;
pub mod flash;
pub mod nvs;
pub mod task;
pub mod time;
