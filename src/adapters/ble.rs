//! BLE link adapter.
//!
//! Implements [`LinkPort`] over a single GATT service. Client writes on RX
//! are copied into [`INBOUND`](crate::channels::INBOUND); TX and Status
//! are notify-only.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys` calls.
//! - **all other targets**: simulation that records notifications.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                     | Perms          |
//! |----------------|------------------------------------------|----------------|
//! | Service        | `0000fff0-5734-5250-5734-525000000000`   |                |
//! | RX             | `0000fff1-…`                             | Write, WriteNR |
//! | TX             | `0000fff2-…`                             | Notify         |
//! | Status         | `0000fff3-…`                             | Notify         |

use log::info;

use crate::app::ports::LinkPort;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x0000fff0_5734_5250_5734_525000000000;
pub const CHAR_RX: u128 = 0x0000fff1_5734_5250_5734_525000000000;
pub const CHAR_TX: u128 = 0x0000fff2_5734_5250_5734_525000000000;
pub const CHAR_STATUS: u128 = 0x0000fff3_5734_5250_5734_525000000000;

/// ATT MTU requested from the stack.
pub const LOCAL_MTU: u16 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ── ESP-IDF static state ──────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These atomics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
mod stack {
    use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

    use esp_idf_svc::sys::*;

    use super::{CHAR_RX, CHAR_STATUS, CHAR_TX, LOCAL_MTU, SERVICE_UUID};

    pub static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    pub static CONN_ID: AtomicU16 = AtomicU16::new(0);
    pub static CONNECTED: AtomicBool = AtomicBool::new(false);
    pub static MTU: AtomicU16 = AtomicU16::new(23);
    pub static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static RX_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static TX_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static STATUS_HANDLE: AtomicU32 = AtomicU32::new(0);
    static CHAR_STEP: AtomicU32 = AtomicU32::new(0);

    fn uuid128(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    unsafe fn add_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
        let mut char_uuid = uuid128(uuid);
        unsafe {
            esp_ble_gatts_add_char(
                svc_handle,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    unsafe fn add_cccd(svc_handle: u16) {
        let mut uuid: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        uuid.len = 2;
        uuid.uuid.uuid16 = ESP_GATT_UUID_CHAR_CLIENT_CONFIG as u16;
        unsafe {
            esp_ble_gatts_add_char_descr(
                svc_handle,
                &mut uuid,
                (ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE) as esp_gatt_perm_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    pub unsafe fn start_advertising() {
        let mut adv_params = esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        };
        unsafe {
            esp_ble_gap_start_advertising(&mut adv_params);
        }
    }

    pub unsafe fn configure_adv_data() {
        let mut uuid = SERVICE_UUID.to_le_bytes();
        let mut adv = esp_ble_adv_data_t {
            set_scan_rsp: false,
            include_name: true,
            include_txpower: false,
            min_interval: 0x06,
            max_interval: 0x12,
            service_uuid_len: uuid.len() as u16,
            p_service_uuid: uuid.as_mut_ptr(),
            flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
            ..unsafe { core::mem::zeroed() }
        };
        unsafe {
            esp_ble_gap_config_adv_data(&mut adv);
        }
    }

    pub unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        _param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_DATA_SET_COMPLETE_EVT => unsafe {
                start_advertising();
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                log::info!("BLE: advertising started");
            }
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);
        let param = unsafe { &*param };

        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: uuid128(SERVICE_UUID),
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                unsafe {
                    esp_ble_gatts_create_service(gatts_if, &mut svc_id, 10);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let svc_handle = unsafe { param.create.service_handle };
                SVC_HANDLE.store(svc_handle as u32, Ordering::Relaxed);
                CHAR_STEP.store(1, Ordering::Relaxed);
                unsafe {
                    esp_ble_gatts_start_service(svc_handle);
                    add_char(
                        svc_handle,
                        CHAR_RX,
                        ESP_GATT_PERM_WRITE,
                        ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_WRITE_NR,
                    );
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let handle = unsafe { param.add_char.attr_handle } as u32;
                let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                match CHAR_STEP.load(Ordering::Relaxed) {
                    1 => {
                        RX_HANDLE.store(handle, Ordering::Relaxed);
                        CHAR_STEP.store(2, Ordering::Relaxed);
                        unsafe {
                            add_char(svc_handle, CHAR_TX, 0, ESP_GATT_CHAR_PROP_BIT_NOTIFY);
                        }
                    }
                    2 => {
                        TX_HANDLE.store(handle, Ordering::Relaxed);
                        unsafe { add_cccd(svc_handle) };
                    }
                    3 => {
                        STATUS_HANDLE.store(handle, Ordering::Relaxed);
                        unsafe { add_cccd(svc_handle) };
                    }
                    _ => {}
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
                let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                if CHAR_STEP.load(Ordering::Relaxed) == 2 {
                    CHAR_STEP.store(3, Ordering::Relaxed);
                    unsafe {
                        add_char(svc_handle, CHAR_STATUS, 0, ESP_GATT_CHAR_PROP_BIT_NOTIFY);
                    }
                } else {
                    CHAR_STEP.store(4, Ordering::Relaxed);
                    log::info!("BLE: GATT service registered");
                    unsafe { configure_adv_data() };
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let conn_id = unsafe { param.connect.conn_id };
                CONN_ID.store(conn_id, Ordering::Relaxed);
                CONNECTED.store(true, Ordering::Release);
                log::info!("BLE: client connected (conn_id={})", conn_id);
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                CONNECTED.store(false, Ordering::Release);
                MTU.store(23, Ordering::Relaxed);
                log::info!("BLE: client disconnected, advertising again");
                unsafe { start_advertising() };
            }
            esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
                let mtu = unsafe { param.mtu.mtu };
                MTU.store(mtu.min(LOCAL_MTU), Ordering::Relaxed);
                log::info!("BLE: MTU {}", mtu);
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let w = unsafe { &param.write };
                if w.handle as u32 == RX_HANDLE.load(Ordering::Relaxed) && !w.value.is_null() {
                    let data = unsafe { core::slice::from_raw_parts(w.value, w.len as usize) };
                    if !crate::channels::push_inbound(data) {
                        log::warn!("BLE: inbound queue full, {} bytes dropped", data.len());
                    }
                }
            }
            _ => {}
        }
    }

    pub fn notify(handle: u32, data: &[u8]) -> bool {
        if handle == 0 || !CONNECTED.load(Ordering::Acquire) {
            return false;
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                CONN_ID.load(Ordering::Relaxed),
                handle as u16,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                false,
            )
        };
        ret == ESP_OK
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleLink {
    state: BleState,
    device_name: heapless::String<29>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimLink,
}

/// Host-side record of everything the adapter sent.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimLink {
    pub connected: bool,
    pub mtu: u16,
    pub tx: Vec<Vec<u8>>,
    pub status: Vec<Vec<u8>>,
}

impl BleLink {
    pub fn new(device_name: &str) -> Self {
        Self {
            state: BleState::Idle,
            device_name: crate::rules::model::ident(device_name),
            #[cfg(not(target_os = "espidf"))]
            sim: SimLink {
                mtu: LOCAL_MTU,
                ..Default::default()
            },
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Bring up the controller and GATT server and start advertising.
    pub fn start(&mut self) {
        info!("BLE: starting as '{}'", self.device_name);
        self.state = if self.platform_start() {
            BleState::Advertising
        } else {
            BleState::Failed
        };
    }

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> bool {
        use esp_idf_svc::sys::*;
        unsafe {
            // BLE-only; classic BT memory is returned to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let ret = esp_bt_controller_init(&mut bt_cfg);
            if ret != ESP_OK {
                log::error!("BLE: bt_controller_init failed ({})", ret);
                return false;
            }
            let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
            if ret != ESP_OK {
                log::error!("BLE: bt_controller_enable failed ({})", ret);
                return false;
            }
            let ret = esp_bluedroid_init();
            if ret != ESP_OK {
                log::error!("BLE: bluedroid_init failed ({})", ret);
                return false;
            }
            let ret = esp_bluedroid_enable();
            if ret != ESP_OK {
                log::error!("BLE: bluedroid_enable failed ({})", ret);
                return false;
            }

            let mut name = [0u8; 30];
            let len = self.device_name.len().min(29);
            name[..len].copy_from_slice(&self.device_name.as_bytes()[..len]);
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            esp_ble_gap_register_callback(Some(stack::gap_event_handler));
            esp_ble_gatts_register_callback(Some(stack::gatts_event_handler));
            esp_ble_gatt_set_local_mtu(LOCAL_MTU);
            esp_ble_gatts_app_register(0);
        }
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> bool {
        info!(
            "BLE(sim): advertising '{}' (service {:032x})",
            self.device_name, SERVICE_UUID
        );
        true
    }

    // ── Simulation hooks ──────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    pub fn sim(&mut self) -> &mut SimLink {
        &mut self.sim
    }

    /// Deliver a client write the way the GATT callback would.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_write(&mut self, data: &[u8]) -> bool {
        crate::channels::push_inbound(data)
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_connect(&mut self, connected: bool) {
        self.sim.connected = connected;
        self.state = if connected {
            BleState::Connected
        } else {
            BleState::Advertising
        };
    }
}

// ───────────────────────────────────────────────────────────────
// LinkPort implementation
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl LinkPort for BleLink {
    fn notify(&mut self, data: &[u8]) -> bool {
        use core::sync::atomic::Ordering;
        stack::notify(stack::TX_HANDLE.load(Ordering::Relaxed), data)
    }

    fn notify_status(&mut self, data: &[u8]) -> bool {
        use core::sync::atomic::Ordering;
        stack::notify(stack::STATUS_HANDLE.load(Ordering::Relaxed), data)
    }

    fn is_connected(&self) -> bool {
        stack::CONNECTED.load(core::sync::atomic::Ordering::Acquire)
    }

    fn mtu(&self) -> u16 {
        stack::MTU.load(core::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkPort for BleLink {
    fn notify(&mut self, data: &[u8]) -> bool {
        if !self.sim.connected {
            return false;
        }
        self.sim.tx.push(data.to_vec());
        true
    }

    fn notify_status(&mut self, data: &[u8]) -> bool {
        if !self.sim.connected {
            return false;
        }
        self.sim.status.push(data.to_vec());
        true
    }

    fn is_connected(&self) -> bool {
        self.sim.connected
    }

    fn mtu(&self) -> u16 {
        self.sim.mtu
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
