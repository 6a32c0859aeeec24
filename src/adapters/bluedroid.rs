//! Bluedroid GATT server adapter.
//!
//! Implements [`PeripheralStack`] on top of the ESP-IDF Bluedroid
//! attribute-table API and forwards the stack's read/write/connection
//! callbacks into the peripheral through a [`CallbackBridge`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_ble_gatts_create_attr_tab` per service,
//!   value attributes answered by the application (`ESP_GATT_RSP_BY_APP`),
//!   declarations / descriptions / CCC answered by the stack.
//! - **all other targets**: simulation that records what would have been
//!   registered, advertised and notified.
//!
//! ## Callback context
//!
//! Bluedroid invokes the GATTS callback on its own task.  Reads and writes
//! block that task inside [`CallbackBridge::read`] / [`CallbackBridge::write`]
//! for at most the configured callback budget.

use log::{info, warn};

use crate::advertising::AdvertisingData;
use crate::app::events::ConnectionId;
use crate::app::ports::PeripheralStack;
use crate::config::PeripheralConfig;
use crate::error::{StackError, StackOp};
use crate::gatt::bridge::CallbackBridge;
use crate::gatt::table::{AttributeRef, AttributeTable};

#[cfg(not(target_os = "espidf"))]
use crate::advertising::MAX_LEGACY_PAYLOAD;

// ───────────────────────────────────────────────────────────────
// ESP-IDF static state
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures.  The link below carries everything they need; it is written
// from the task context and read from the Bluedroid task.

#[cfg(target_os = "espidf")]
mod link {
    use std::sync::Mutex;

    use crate::gatt::bridge::CallbackBridge;
    use crate::gatt::table::{AttributeEntry, AttributeRef, AttributeTable};

    pub struct GattLink {
        pub bridge: Option<CallbackBridge>,
        pub gatts_if: u8,
        pub tables: Vec<AttributeTable>,
        /// Handles assigned by the stack, per table, parallel to its entries.
        pub handles: Vec<Vec<u16>>,
        /// Peer addresses by connection id (for GAP disconnect).
        pub peers: Vec<(u16, [u8; 6])>,
    }

    pub static LINK: Mutex<GattLink> = Mutex::new(GattLink {
        bridge: None,
        gatts_if: 0xff,
        tables: Vec::new(),
        handles: Vec::new(),
        peers: Vec::new(),
    });

    impl GattLink {
        pub fn locate(&self, handle: u16) -> Option<(AttributeRef, AttributeEntry)> {
            for (t, handles) in self.handles.iter().enumerate() {
                if let Some(e) = handles.iter().position(|h| *h == handle) {
                    let entry = self.tables.get(t)?.get(e)?.clone();
                    let attr = AttributeRef {
                        table: t as u16,
                        entry: e as u16,
                    };
                    return Some((attr, entry));
                }
            }
            None
        }

        pub fn handle_of(&self, attr: AttributeRef) -> Option<u16> {
            self.handles
                .get(attr.table as usize)?
                .get(attr.entry as usize)
                .copied()
        }
    }
}

#[cfg(target_os = "espidf")]
fn format_bda(bda: &[u8; 6]) -> crate::app::events::PeerAddress {
    use core::fmt::Write;
    let mut out = crate::app::events::PeerAddress::new();
    let _ = write!(
        out,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        bda[0], bda[1], bda[2], bda[3], bda[4], bda[5]
    );
    out
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            let status = unsafe { (*param).adv_start_cmpl.status };
            if status == esp_bt_status_t_ESP_BT_STATUS_SUCCESS {
                log::info!("BLE GAP: advertising started");
            } else {
                log::warn!("BLE GAP: advertising start failed ({})", status);
            }
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising stopped");
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use crate::app::events::StackEvent;
    use esp_idf_svc::sys::*;

    let Ok(mut link) = link::LINK.lock() else {
        return;
    };

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            let status = unsafe { (*param).reg.status };
            link.gatts_if = gatts_if;
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            if let Some(bridge) = &link.bridge {
                bridge.post(StackEvent::Ready {
                    status: status as i32,
                });
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREAT_ATTR_TAB_EVT => {
            let p = unsafe { &(*param).add_attr_tab };
            if p.status != esp_gatt_status_t_ESP_GATT_OK {
                log::error!("BLE GATTS: attribute table rejected ({})", p.status);
                return;
            }
            let handles =
                unsafe { core::slice::from_raw_parts(p.handles, p.num_handle as usize) }.to_vec();
            let index = p.svc_inst_id as usize;
            if let (Some(slot), Some(first)) = (link.handles.get_mut(index), handles.first()) {
                unsafe { esp_ble_gatts_start_service(*first) };
                log::info!(
                    "BLE GATTS: service {} started ({} handles)",
                    index,
                    handles.len()
                );
                *slot = handles;
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &(*param).connect };
            link.peers.retain(|(id, _)| *id != p.conn_id);
            link.peers.push((p.conn_id, p.remote_bda));
            if let Some(bridge) = &link.bridge {
                bridge.post(StackEvent::Connected {
                    conn: ConnectionId(p.conn_id),
                    address: format_bda(&p.remote_bda),
                });
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            link.peers.retain(|(id, _)| *id != p.conn_id);
            if let Some(bridge) = &link.bridge {
                bridge.post(StackEvent::Disconnected {
                    conn: ConnectionId(p.conn_id),
                    reason: p.reason as u8,
                });
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            if !p.need_rsp {
                return;
            }
            let located = link.locate(p.handle);
            let bridge = link.bridge.clone();
            // The bridge may block; never hold the link across it.
            drop(link);

            let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
            let status = match (located, bridge) {
                (Some((_, entry)), Some(bridge)) => {
                    let value = unsafe { &mut rsp.attr_value };
                    match bridge.read(&entry, p.offset, &mut value.value) {
                        Ok(n) => {
                            value.handle = p.handle;
                            value.offset = p.offset;
                            value.len = n as u16;
                            esp_gatt_status_t_ESP_GATT_OK
                        }
                        Err(e) => esp_gatt_status_t::from(e.code()),
                    }
                }
                _ => esp_gatt_status_t_ESP_GATT_INVALID_HANDLE,
            };
            unsafe { esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, &mut rsp) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
            let located = link.locate(p.handle);
            let bridge = link.bridge.clone();
            drop(link);

            let status = match (located, bridge) {
                (Some((_, entry)), Some(bridge)) => match bridge.write(&entry, p.offset, data) {
                    Ok(_) => esp_gatt_status_t_ESP_GATT_OK,
                    Err(e) => esp_gatt_status_t::from(e.code()),
                },
                _ => esp_gatt_status_t_ESP_GATT_INVALID_HANDLE,
            };
            if p.need_rsp {
                unsafe {
                    esp_ble_gatts_send_response(
                        gatts_if,
                        p.conn_id,
                        p.trans_id,
                        status,
                        core::ptr::null_mut(),
                    )
                };
            }
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
fn esp_check(op: StackOp, ret: esp_idf_svc::sys::esp_err_t) -> Result<(), StackError> {
    if ret == esp_idf_svc::sys::ESP_OK as i32 {
        Ok(())
    } else {
        Err(StackError::new(op, ret))
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackState {
    Stopped,
    Started,
    Failed,
}

pub struct BluedroidStack {
    state: StackState,
    adv_interval_min: u16,
    adv_interval_max: u16,
    #[cfg(not(target_os = "espidf"))]
    sim: SimState,
}

/// What the simulation would have pushed to the controller.
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimState {
    bridge: Option<CallbackBridge>,
    tables: Vec<AttributeTable>,
    advertising: Option<AdvertisingData>,
    notifications: Vec<(ConnectionId, AttributeRef, Vec<u8>)>,
}

impl BluedroidStack {
    pub fn new(config: &PeripheralConfig) -> Self {
        Self {
            state: StackState::Stopped,
            adv_interval_min: config.adv_interval_min,
            adv_interval_max: config.adv_interval_max,
            #[cfg(not(target_os = "espidf"))]
            sim: SimState::default(),
        }
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    /// Bring the controller and host stack up.  Readiness is reported
    /// asynchronously through `bridge` as `StackEvent::Ready`.
    pub fn start(&mut self, bridge: CallbackBridge) -> anyhow::Result<()> {
        match self.platform_start(bridge) {
            Ok(()) => {
                self.state = StackState::Started;
                Ok(())
            }
            Err(e) => {
                self.state = StackState::Failed;
                Err(e)
            }
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self, bridge: CallbackBridge) -> anyhow::Result<()> {
        use esp_idf_svc::sys::*;

        link::LINK
            .lock()
            .map_err(|_| anyhow::anyhow!("GATT link poisoned"))?
            .bridge = Some(bridge);

        let check = |ret: esp_err_t| esp_check(StackOp::Start, ret);
        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg))?;
            check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
            check(esp_bluedroid_init())?;
            check(esp_bluedroid_enable())?;

            check(esp_ble_gap_register_callback(Some(gap_event_handler)))?;
            check(esp_ble_gatts_register_callback(Some(gatts_event_handler)))?;
            check(esp_ble_gatts_app_register(0))?;
        }
        info!("BLE(espidf): Bluedroid stack initialised");
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self, bridge: CallbackBridge) -> anyhow::Result<()> {
        use crate::app::events::StackEvent;

        if !bridge.post(StackEvent::Ready { status: 0 }) {
            anyhow::bail!("work queue full, ready event lost");
        }
        self.sim.bridge = Some(bridge);
        info!("BLE(sim): stack ready");
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_register(&mut self, tables: Vec<AttributeTable>) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;

        let mut link = link::LINK
            .lock()
            .map_err(|_| StackError::new(StackOp::Register, ESP_FAIL as i32))?;
        let gatts_if = link.gatts_if;

        for (index, table) in tables.iter().enumerate() {
            if table.len() > usize::from(u8::MAX) {
                return Err(StackError::new(StackOp::Register, ESP_ERR_INVALID_SIZE as i32));
            }
            // Backing storage must outlive the create call.
            let mut uuids: Vec<[u8; 2]> = table.entries.iter().map(|e| e.uuid.to_le_bytes()).collect();
            let mut values: Vec<Vec<u8>> = table
                .entries
                .iter()
                .map(|e| e.static_value().unwrap_or_default())
                .collect();

            let db: Vec<esp_gatts_attr_db_t> = table
                .entries
                .iter()
                .zip(uuids.iter_mut().zip(values.iter_mut()))
                .map(|(entry, (uuid, value))| {
                    let by_app = entry.static_value().is_none();
                    let mut perm = 0u16;
                    if entry.permissions.readable() {
                        perm |= ESP_GATT_PERM_READ as u16;
                    }
                    if entry.permissions.writable() {
                        perm |= ESP_GATT_PERM_WRITE as u16;
                    }
                    esp_gatts_attr_db_t {
                        attr_control: esp_attr_control_t {
                            auto_rsp: if by_app {
                                ESP_GATT_RSP_BY_APP as u8
                            } else {
                                ESP_GATT_AUTO_RSP as u8
                            },
                        },
                        att_desc: esp_attr_desc_t {
                            uuid_length: ESP_UUID_LEN_16 as u16,
                            uuid_p: uuid.as_mut_ptr(),
                            perm,
                            max_length: if by_app { 512 } else { value.len() as u16 },
                            length: value.len() as u16,
                            value: if value.is_empty() {
                                core::ptr::null_mut()
                            } else {
                                value.as_mut_ptr()
                            },
                        },
                    }
                })
                .collect();

            let ret = unsafe {
                esp_ble_gatts_create_attr_tab(db.as_ptr(), gatts_if, db.len() as u8, index as u8)
            };
            if let Err(e) = esp_check(StackOp::Register, ret) {
                // Roll back the services created so far in this batch.
                for handles in link.handles.drain(..) {
                    if let Some(first) = handles.first() {
                        unsafe { esp_ble_gatts_delete_service(*first) };
                    }
                }
                link.tables.clear();
                return Err(e);
            }
            link.handles.push(Vec::new());
        }

        link.tables = tables;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_register(&mut self, tables: Vec<AttributeTable>) -> Result<(), StackError> {
        for table in &tables {
            info!(
                "BLE(sim): service {} registered ({} attributes)",
                table.service,
                table.len()
            );
        }
        self.sim.tables = tables;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_unregister(&mut self) {
        if let Ok(mut link) = link::LINK.lock() {
            for handles in link.handles.drain(..) {
                if let Some(first) = handles.first() {
                    unsafe { esp_idf_svc::sys::esp_ble_gatts_delete_service(*first) };
                }
            }
            link.tables.clear();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_unregister(&mut self) {
        info!("BLE(sim): {} service(s) removed", self.sim.tables.len());
        self.sim.tables.clear();
    }

    #[cfg(target_os = "espidf")]
    fn platform_advertise(&mut self, data: &AdvertisingData) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;

        let mut adv = data.advertising_payload();
        let mut scan = data.scan_response_payload();
        if adv.len() > crate::advertising::MAX_LEGACY_PAYLOAD
            || scan.len() > crate::advertising::MAX_LEGACY_PAYLOAD
        {
            return Err(StackError::new(StackOp::Advertise, ESP_ERR_INVALID_SIZE as i32));
        }
        unsafe {
            esp_check(
                StackOp::Advertise,
                esp_ble_gap_config_adv_data_raw(adv.as_mut_ptr(), adv.len() as u32),
            )?;
            esp_check(
                StackOp::Advertise,
                esp_ble_gap_config_scan_rsp_data_raw(scan.as_mut_ptr(), scan.len() as u32),
            )?;
            let mut params = esp_ble_adv_params_t {
                adv_int_min: self.adv_interval_min,
                adv_int_max: self.adv_interval_max,
                adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
                channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
                adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
                ..core::mem::zeroed()
            };
            esp_check(StackOp::Advertise, esp_ble_gap_start_advertising(&mut params))
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_advertise(&mut self, data: &AdvertisingData) -> Result<(), StackError> {
        let len = data.advertising_payload().len();
        if len > MAX_LEGACY_PAYLOAD {
            warn!("BLE(sim): advertising payload of {len} bytes exceeds a legacy PDU");
            return Err(StackError::new(StackOp::Advertise, -1));
        }
        info!(
            "BLE(sim): advertising {} record(s), interval {:#x}..{:#x}",
            data.records.len(),
            self.adv_interval_min,
            self.adv_interval_max
        );
        self.sim.advertising = Some(data.clone());
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop_advertising(&mut self) -> Result<(), StackError> {
        esp_check(StackOp::Advertise, unsafe {
            esp_idf_svc::sys::esp_ble_gap_stop_advertising()
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop_advertising(&mut self) -> Result<(), StackError> {
        info!("BLE(sim): advertising stopped");
        self.sim.advertising = None;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(
        &mut self,
        conn: ConnectionId,
        attr: AttributeRef,
        value: &[u8],
    ) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;

        let (gatts_if, handle) = {
            let link = link::LINK
                .lock()
                .map_err(|_| StackError::new(StackOp::Notify, ESP_FAIL as i32))?;
            let handle = link
                .handle_of(attr)
                .ok_or(StackError::new(StackOp::Notify, ESP_ERR_NOT_FOUND as i32))?;
            (link.gatts_if, handle)
        };
        let mut buf = value.to_vec();
        esp_check(StackOp::Notify, unsafe {
            esp_ble_gatts_send_indicate(
                gatts_if,
                conn.0,
                handle,
                buf.len() as u16,
                buf.as_mut_ptr(),
                false,
            )
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(
        &mut self,
        conn: ConnectionId,
        attr: AttributeRef,
        value: &[u8],
    ) -> Result<(), StackError> {
        let known = self
            .sim
            .tables
            .get(attr.table as usize)
            .is_some_and(|t| (attr.entry as usize) < t.len());
        if !known {
            return Err(StackError::new(StackOp::Notify, -2));
        }
        info!("BLE(sim): notify {} bytes on {:?}", value.len(), attr);
        self.sim.notifications.push((conn, attr, value.to_vec()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self, conn: ConnectionId) -> Result<(), StackError> {
        use esp_idf_svc::sys::*;

        let mut bda = link::LINK
            .lock()
            .ok()
            .and_then(|link| link.peers.iter().find(|(id, _)| *id == conn.0).map(|(_, b)| *b))
            .ok_or(StackError::new(StackOp::Disconnect, ESP_ERR_NOT_FOUND as i32))?;
        esp_check(StackOp::Disconnect, unsafe {
            esp_ble_gap_disconnect(bda.as_mut_ptr())
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self, conn: ConnectionId) -> Result<(), StackError> {
        use crate::app::events::StackEvent;

        info!("BLE(sim): terminating connection {}", conn.0);
        if let Some(bridge) = &self.sim.bridge {
            bridge.post(StackEvent::Disconnected { conn, reason: 0x16 });
        }
        Ok(())
    }
}

// ── Simulation inspection ─────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl BluedroidStack {
    pub fn sim_tables(&self) -> &[AttributeTable] {
        &self.sim.tables
    }

    pub fn sim_advertising(&self) -> Option<&AdvertisingData> {
        self.sim.advertising.as_ref()
    }

    pub fn sim_notifications(&self) -> &[(ConnectionId, AttributeRef, Vec<u8>)] {
        &self.sim.notifications
    }
}

// ───────────────────────────────────────────────────────────────
// PeripheralStack implementation
// ───────────────────────────────────────────────────────────────

impl PeripheralStack for BluedroidStack {
    fn register(&mut self, tables: Vec<AttributeTable>) -> Result<(), StackError> {
        if self.state != StackState::Started {
            warn!("BLE: register before stack start");
            return Err(StackError::new(StackOp::Register, -1));
        }
        self.platform_register(tables)
    }

    fn unregister_all(&mut self) {
        self.platform_unregister();
    }

    fn start_advertising(&mut self, data: &AdvertisingData) -> Result<(), StackError> {
        if self.state != StackState::Started {
            return Err(StackError::new(StackOp::Advertise, -1));
        }
        self.platform_advertise(data)
    }

    fn stop_advertising(&mut self) -> Result<(), StackError> {
        self.platform_stop_advertising()
    }

    fn notify(
        &mut self,
        conn: ConnectionId,
        attr: AttributeRef,
        value: &[u8],
    ) -> Result<(), StackError> {
        self.platform_notify(conn, attr, value)
    }

    fn disconnect(&mut self, conn: ConnectionId) -> Result<(), StackError> {
        self.platform_disconnect(conn)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
