//! Simulated card model
//!
//! Consumes C-APDUs and produces R-APDUs the way a provisioned UICC would:
//! dispatch is by instruction byte, the card half of the secure channel
//! handles INITIALIZE UPDATE / EXTERNAL AUTHENTICATE, and a small registry
//! tracks Security Domain and application lifecycle states. Any instruction
//! outside the supported set answers `6D00` with no side effects.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use ramb_apdu::gp::{self, AppLifecycle, SdLifecycle, StatusEntry};
use ramb_apdu::status::sw;
use ramb_apdu::{Command, Response, StatusWord};
use ramb_scp::{CardChannel, SecurityLevel};

use crate::config::CardConfig;

/// One application in the card registry
#[derive(Debug, Clone)]
pub struct AppEntry {
    /// Application AID
    pub aid: Bytes,
    /// Lifecycle state
    pub lifecycle: AppLifecycle,
    /// Privilege bytes
    pub privileges: Bytes,
}

/// The simulated card
#[derive(Debug)]
pub struct CardModel {
    config: CardConfig,
    sd_lifecycle: SdLifecycle,
    registry: Vec<AppEntry>,
    selected: Option<Bytes>,
    data_objects: HashMap<u16, Bytes>,
    channel: Option<CardChannel>,
    authenticated: bool,
    store_data_buffer: BytesMut,
}

impl CardModel {
    /// A fresh card in OP_READY with an empty registry
    pub fn new(config: CardConfig) -> Self {
        let mut data_objects = HashMap::new();
        // CPLC-style identification data served via GET DATA
        data_objects.insert(
            0x9F7F,
            Bytes::from_static(&[
                0x47, 0x90, 0x50, 0x40, 0x47, 0x91, 0x81, 0x02, 0x31, 0x00, 0x83, 0x58,
            ]),
        );
        data_objects.insert(0x0042, Bytes::from_static(&[0x01, 0x23, 0x45]));
        data_objects.insert(0x0045, Bytes::from_static(&[0x67, 0x89, 0xAB]));

        Self {
            config,
            sd_lifecycle: SdLifecycle::OpReady,
            registry: Vec::new(),
            selected: None,
            data_objects,
            channel: None,
            authenticated: false,
            store_data_buffer: BytesMut::new(),
        }
    }

    /// Pre-install an application (test fixtures and GET STATUS content)
    pub fn install_application(&mut self, aid: Bytes, lifecycle: AppLifecycle) {
        self.registry.push(AppEntry {
            aid,
            lifecycle,
            privileges: Bytes::from_static(&[0x00, 0x00, 0x00]),
        });
    }

    /// Force the Security Domain lifecycle (lock/terminate scenarios)
    pub const fn set_sd_lifecycle(&mut self, lifecycle: SdLifecycle) {
        self.sd_lifecycle = lifecycle;
    }

    /// Currently selected application AID
    pub fn selected(&self) -> Option<&Bytes> {
        self.selected.as_ref()
    }

    /// Whether a secure channel is fully authenticated
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Process one C-APDU and produce the R-APDU
    pub fn process(&mut self, raw: &[u8]) -> Response {
        let command = match Command::from_bytes(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!("unparseable C-APDU: {e}");
                return Response::status_only(sw::WRONG_LENGTH);
            }
        };
        trace!(ins = format_args!("{:#04x}", command.ins), "C-APDU dispatch");

        // Wrapped commands are MAC-verified (and decrypted) before dispatch;
        // a bad MAC tears the channel down.
        let command = if command.cla & gp::cla::SECURE != 0 {
            let Some(channel) = self.channel.as_mut() else {
                return Response::status_only(sw::SECURITY_NOT_SATISFIED);
            };
            match channel.unwrap_command(&command) {
                Ok(clear) => clear,
                Err(e) => {
                    warn!("secure messaging verification failed: {e}");
                    self.reset_channel();
                    return Response::status_only(sw::SECURITY_NOT_SATISFIED);
                }
            }
        } else if self.authenticated && command.cla == gp::cla::GP {
            // Once the channel is live, clear GP commands are refused
            return Response::status_only(sw::SECURITY_NOT_SATISFIED);
        } else {
            command
        };

        match command.ins {
            gp::ins::SELECT => self.select(&command),
            gp::ins::GET_STATUS => self.get_status(&command),
            gp::ins::GET_DATA => self.get_data(&command),
            gp::ins::INITIALIZE_UPDATE => self.initialize_update(&command),
            gp::ins::EXTERNAL_AUTHENTICATE => self.external_authenticate(&command),
            gp::ins::INSTALL => self.install(&command),
            gp::ins::DELETE => self.delete(&command),
            gp::ins::PUT_KEY => self.put_key(&command),
            gp::ins::STORE_DATA => self.store_data(&command),
            _ => Response::status_only(sw::INS_NOT_SUPPORTED),
        }
    }

    fn reset_channel(&mut self) {
        self.channel = None;
        self.authenticated = false;
    }

    /// Management operations require a live channel and a workable
    /// Security Domain lifecycle
    fn management_allowed(&self) -> Option<StatusWord> {
        if matches!(
            self.sd_lifecycle,
            SdLifecycle::CardLocked | SdLifecycle::Terminated
        ) {
            return Some(sw::CONDITIONS_NOT_SATISFIED);
        }
        if !self.authenticated {
            return Some(sw::SECURITY_NOT_SATISFIED);
        }
        None
    }

    fn select(&mut self, command: &Command) -> Response {
        if command.p1 != gp::select_p1::BY_NAME {
            return Response::status_only(sw::INCORRECT_P1P2);
        }
        let aid = command.data.clone().unwrap_or_default();

        let known = aid == self.config.isd_aid
            || self
                .registry
                .iter()
                .any(|entry| entry.aid == aid && entry.lifecycle == AppLifecycle::Selectable);
        if !known {
            // Selection is left unchanged
            return Response::status_only(sw::FILE_NOT_FOUND);
        }

        // SELECT resets any secure channel state
        self.reset_channel();
        self.selected = Some(aid.clone());
        debug!(aid = %hex::encode(&aid), "application selected");

        match gp::fci_template(&aid) {
            Ok(fci) => Response::success(fci),
            Err(_) => Response::status_only(sw::WRONG_DATA),
        }
    }

    fn get_status(&mut self, command: &Command) -> Response {
        let entries: Vec<StatusEntry> = match command.p1 {
            gp::get_status_p1::ISSUER_SECURITY_DOMAIN => vec![StatusEntry {
                aid: self.config.isd_aid.clone(),
                lifecycle: self.sd_lifecycle.to_byte(),
                privileges: Bytes::from_static(&[0x9E, 0x00, 0x00]),
            }],
            gp::get_status_p1::APPLICATIONS => self
                .registry
                .iter()
                .map(|entry| StatusEntry {
                    aid: entry.aid.clone(),
                    lifecycle: entry.lifecycle.to_byte(),
                    privileges: entry.privileges.clone(),
                })
                .collect(),
            _ => return Response::status_only(sw::INCORRECT_P1P2),
        };

        let mut payload = BytesMut::new();
        for entry in &entries {
            match entry.to_tlv() {
                Ok(tlv) => payload.put_slice(&tlv),
                Err(_) => return Response::status_only(sw::WRONG_DATA),
            }
        }
        Response::success(payload.freeze())
    }

    fn get_data(&mut self, command: &Command) -> Response {
        let tag = u16::from_be_bytes([command.p1, command.p2]);
        match self.data_objects.get(&tag) {
            Some(value) => Response::success(value.clone()),
            None => Response::status_only(sw::REFERENCED_DATA_NOT_FOUND),
        }
    }

    fn initialize_update(&mut self, command: &Command) -> Response {
        if matches!(
            self.sd_lifecycle,
            SdLifecycle::CardLocked | SdLifecycle::Terminated
        ) {
            return Response::status_only(sw::CONDITIONS_NOT_SATISFIED);
        }
        let Some(host_challenge) = command
            .data
            .as_deref()
            .and_then(|data| <[u8; 8]>::try_from(data).ok())
        else {
            return Response::status_only(sw::WRONG_LENGTH);
        };

        // A new INITIALIZE UPDATE discards any previous channel state
        self.reset_channel();
        let (channel, payload) = CardChannel::respond(
            self.config.variant,
            &self.config.scp_keys,
            self.config.key_diversification,
            self.config.key_version,
            self.config.sequence_counter,
            host_challenge,
        );
        self.channel = Some(channel);
        debug!(variant = ?self.config.variant, "INITIALIZE UPDATE answered");
        Response::success(payload)
    }

    fn external_authenticate(&mut self, command: &Command) -> Response {
        let Some(channel) = self.channel.as_mut() else {
            return Response::status_only(sw::CONDITIONS_NOT_SATISFIED);
        };
        let Some(level) = SecurityLevel::from_p1(command.p1) else {
            return Response::status_only(sw::INCORRECT_P1P2);
        };
        let cryptogram = command.data.as_deref().unwrap_or(&[]);

        if channel.verify_host_cryptogram(cryptogram).is_err() {
            warn!("host cryptogram verification failed");
            self.reset_channel();
            return Response::status_only(sw::SECURITY_NOT_SATISFIED);
        }
        if channel.activate(level).is_err() {
            self.reset_channel();
            return Response::status_only(sw::INCORRECT_P1P2);
        }
        self.authenticated = true;
        debug!(?level, "mutual authentication complete");
        Response::status_only(sw::SUCCESS)
    }

    fn install(&mut self, command: &Command) -> Response {
        if let Some(status) = self.management_allowed() {
            return Response::status_only(status);
        }
        let data = command.data.as_deref().unwrap_or(&[]);
        let mut fields = Vec::new();
        let mut cursor = 0usize;
        // Length-prefixed: load file AID, module AID, application AID
        for _ in 0..3 {
            let Some(&len) = data.get(cursor) else {
                return Response::status_only(sw::WRONG_DATA);
            };
            let start = cursor + 1;
            let end = start + len as usize;
            let Some(field) = data.get(start..end) else {
                return Response::status_only(sw::WRONG_DATA);
            };
            fields.push(Bytes::copy_from_slice(field));
            cursor = end;
        }
        let application_aid = fields[2].clone();
        if application_aid.is_empty() {
            return Response::status_only(sw::WRONG_DATA);
        }
        if self.registry.iter().any(|e| e.aid == application_aid) {
            return Response::status_only(sw::WRONG_DATA);
        }

        let lifecycle = if command.p1 & gp::install_p1::FOR_MAKE_SELECTABLE != 0 {
            AppLifecycle::Selectable
        } else {
            AppLifecycle::Installed
        };
        debug!(aid = %hex::encode(&application_aid), ?lifecycle, "application installed");
        self.registry.push(AppEntry {
            aid: application_aid,
            lifecycle,
            privileges: Bytes::from_static(&[0x00, 0x00, 0x00]),
        });
        Response::status_only(sw::SUCCESS)
    }

    fn delete(&mut self, command: &Command) -> Response {
        if let Some(status) = self.management_allowed() {
            return Response::status_only(status);
        }
        let data = command.data.as_deref().unwrap_or(&[]);
        let Some(aid) = ramb_apdu::tlv::find_simple_value(data, gp::tags::AID as u8) else {
            return Response::status_only(sw::WRONG_DATA);
        };

        let before = self.registry.len();
        self.registry.retain(|entry| entry.aid != aid);
        if self.registry.len() == before {
            return Response::status_only(sw::REFERENCED_DATA_NOT_FOUND);
        }
        if self.selected.as_ref() == Some(&aid) {
            self.selected = None;
        }
        debug!(aid = %hex::encode(&aid), "application deleted");
        Response::status_only(sw::SUCCESS)
    }

    fn put_key(&mut self, command: &Command) -> Response {
        if let Some(status) = self.management_allowed() {
            return Response::status_only(status);
        }
        let data = command.data.as_deref().unwrap_or(&[]);
        if data.is_empty() {
            return Response::status_only(sw::WRONG_DATA);
        }
        // The harness acknowledges the new key version without rotating the
        // live session keys; real rotation lands with the next session.
        debug!(key_version = command.p1, "PUT KEY acknowledged");
        Response::success(vec![command.p1])
    }

    fn store_data(&mut self, command: &Command) -> Response {
        if let Some(status) = self.management_allowed() {
            return Response::status_only(status);
        }
        if let Some(data) = command.data.as_deref() {
            self.store_data_buffer.put_slice(data);
        }
        Response::status_only(sw::SUCCESS)
    }
}
