//! Provisioning script driver
//!
//! The server-side GP command processor: a script is an ordered list of
//! card-management steps, and the driver turns (script cursor, previous
//! R-APDU) into the next C-APDU. INITIALIZE UPDATE and EXTERNAL
//! AUTHENTICATE delegate their cryptography to the secure channel engine;
//! once a channel is up every subsequent command is wrapped through it.

use std::collections::VecDeque;

use bytes::Bytes;
use rand::RngCore;
use tracing::{debug, warn};

use ramb_apdu::gp;
use ramb_apdu::{Command, Response, StatusCategory};
use ramb_scp::{AuthError, HostChannel, ScpVariant, SecurityLevel, StaticKeys};
use ramb_session::SessionError;

/// One card-management step of a provisioning script
#[derive(Debug, Clone)]
pub enum Step {
    /// SELECT by AID
    Select(Bytes),
    /// INITIALIZE UPDATE + EXTERNAL AUTHENTICATE against one SCP variant
    OpenSecureChannel {
        /// Protocol variant to negotiate
        variant: ScpVariant,
        /// Command-direction security level
        level: SecurityLevel,
    },
    /// GET STATUS for a registry scope
    GetStatus {
        /// P1 scope byte
        scope: u8,
    },
    /// GET DATA for a tag
    GetData {
        /// Two-byte data object tag
        tag: u16,
    },
    /// INSTALL [for install and make selectable]
    Install {
        /// Executable load file AID
        load_file_aid: Bytes,
        /// Module AID inside the load file
        module_aid: Bytes,
        /// Application instance AID
        application_aid: Bytes,
    },
    /// DELETE an object by AID
    Delete {
        /// Object AID
        aid: Bytes,
        /// Also delete related objects
        and_related: bool,
    },
    /// PUT KEY with a pre-built key data block
    PutKey {
        /// New key version number
        key_version: u8,
        /// First key identifier
        key_id: u8,
        /// Key data field
        data: Bytes,
    },
    /// STORE DATA, single block
    StoreData {
        /// Data object payload
        data: Bytes,
    },
}

/// An ordered provisioning script
#[derive(Debug, Clone, Default)]
pub struct ProvisioningScript {
    steps: Vec<Step>,
}

impl ProvisioningScript {
    /// Script with no steps: the session completes immediately
    pub const fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Script from explicit steps
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// The default compliance scenario: SELECT the ISD-R and stop
    pub fn select_isd() -> Self {
        Self::new(vec![Step::Select(Bytes::copy_from_slice(&gp::aid::ISD_R))])
    }

    /// A fuller sweep: select, authenticate and read the registry
    pub fn authenticated_audit(variant: ScpVariant, level: SecurityLevel) -> Self {
        Self::new(vec![
            Step::Select(Bytes::copy_from_slice(&gp::aid::ISD_R)),
            Step::OpenSecureChannel { variant, level },
            Step::GetStatus {
                scope: gp::get_status_p1::ISSUER_SECURITY_DOMAIN,
            },
            Step::GetStatus {
                scope: gp::get_status_p1::APPLICATIONS,
            },
        ])
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the script has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// What the driver is waiting for
#[derive(Debug)]
enum Pending {
    /// No command outstanding
    None,
    /// A plain (or wrapped) step command is outstanding
    Step,
    /// INITIALIZE UPDATE is outstanding
    InitUpdate {
        variant: ScpVariant,
        level: SecurityLevel,
        host_challenge: [u8; 8],
    },
    /// EXTERNAL AUTHENTICATE is outstanding
    ExternalAuthenticate { level: SecurityLevel },
}

/// Drives one session's script from R-APDU to next C-APDU
#[derive(Debug)]
pub struct ScriptDriver {
    steps: VecDeque<Step>,
    static_keys: StaticKeys,
    key_version: u8,
    channel: Option<HostChannel>,
    pending: Pending,
}

impl ScriptDriver {
    /// Driver over one session; `static_keys` feed secure channel steps
    pub fn new(script: ProvisioningScript, static_keys: StaticKeys, key_version: u8) -> Self {
        Self {
            steps: script.steps.into(),
            static_keys,
            key_version,
            channel: None,
            pending: Pending::None,
        }
    }

    /// Produce the next C-APDU given the previous R-APDU (`None` for the
    /// session-opening request). `Ok(None)` means the script is complete
    /// and the session should end with 204.
    pub fn next_command(
        &mut self,
        response: Option<&Response>,
    ) -> Result<Option<Command>, SessionError> {
        match std::mem::replace(&mut self.pending, Pending::None) {
            Pending::None => {
                // Nothing outstanding; a stray R-APDU is ignored
            }
            Pending::Step => {
                let Some(response) = response else {
                    return Ok(None);
                };
                if !matches!(
                    response.status.categorize(),
                    StatusCategory::Success | StatusCategory::MoreData(_)
                ) {
                    // A failed management step ends the script; the session
                    // itself still completes cleanly with 204.
                    warn!(status = %response.status, "step failed; aborting remaining script");
                    self.steps.clear();
                    return Ok(None);
                }
            }
            Pending::InitUpdate {
                variant,
                level,
                host_challenge,
            } => {
                let Some(response) = response else {
                    return Ok(None);
                };
                if !response.is_success() {
                    return Err(AuthError::NotAuthenticated.into());
                }
                let mut channel = HostChannel::initialize(
                    variant,
                    &self.static_keys,
                    host_challenge,
                    &response.data,
                )?;

                let ext_auth = gp::external_authenticate(level.p1(), channel.host_cryptogram());
                let wrapped = channel.wrap_command(&ext_auth)?;
                self.channel = Some(channel);
                self.pending = Pending::ExternalAuthenticate { level };
                return Ok(Some(wrapped));
            }
            Pending::ExternalAuthenticate { level } => {
                let Some(response) = response else {
                    return Ok(None);
                };
                if !response.is_success() {
                    return Err(AuthError::CryptogramMismatch.into());
                }
                if let Some(channel) = self.channel.as_mut() {
                    channel.activate(level)?;
                }
                debug!("secure channel established");
            }
        }

        self.advance()
    }

    fn advance(&mut self) -> Result<Option<Command>, SessionError> {
        let Some(step) = self.steps.pop_front() else {
            return Ok(None);
        };

        let command = match step {
            Step::Select(aid) => {
                // SELECT travels outside the secure channel
                self.pending = Pending::Step;
                return Ok(Some(gp::select_by_aid(aid)));
            }
            Step::OpenSecureChannel { variant, level } => {
                let mut host_challenge = [0u8; 8];
                rand::rng().fill_bytes(&mut host_challenge);
                self.pending = Pending::InitUpdate {
                    variant,
                    level,
                    host_challenge,
                };
                return Ok(Some(gp::initialize_update(self.key_version, host_challenge)));
            }
            Step::GetStatus { scope } => gp::get_status(scope, &[]),
            Step::GetData { tag } => gp::get_data(tag),
            Step::Install {
                load_file_aid,
                module_aid,
                application_aid,
            } => gp::install_for_install(&load_file_aid, &module_aid, &application_aid, &[], &[]),
            Step::Delete { aid, and_related } => gp::delete_object(&aid, and_related),
            Step::PutKey {
                key_version,
                key_id,
                data,
            } => gp::put_key(key_version, key_id, &data),
            Step::StoreData { data } => gp::store_data(true, 0, &data),
        };

        self.pending = Pending::Step;
        let command = match self.channel.as_mut() {
            Some(channel) => channel.wrap_command(&command)?,
            None => command,
        };
        Ok(Some(command))
    }

    /// True once no further commands will be produced
    pub fn is_complete(&self) -> bool {
        self.steps.is_empty() && matches!(self.pending, Pending::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn keys() -> StaticKeys {
        StaticKeys::from_single_key(hex!("404142434445464748494a4b4c4d4e4f"))
    }

    #[test]
    fn select_script_runs_to_completion() {
        let mut driver = ScriptDriver::new(ProvisioningScript::select_isd(), keys(), 0x20);

        let select = driver.next_command(None).unwrap().unwrap();
        assert_eq!(
            select.to_bytes().as_ref(),
            hex!("00A4040008A000000151000000")
        );

        let done = driver
            .next_command(Some(&Response::success(Bytes::new())))
            .unwrap();
        assert!(done.is_none());
        assert!(driver.is_complete());
    }

    #[test]
    fn empty_script_completes_immediately() {
        let mut driver = ScriptDriver::new(ProvisioningScript::empty(), keys(), 0x20);
        assert!(driver.next_command(None).unwrap().is_none());
    }

    #[test]
    fn failed_step_aborts_remaining_script() {
        let script = ProvisioningScript::new(vec![
            Step::Select(Bytes::copy_from_slice(&hex!("A0000000030000"))),
            Step::GetStatus { scope: 0x80 },
        ]);
        let mut driver = ScriptDriver::new(script, keys(), 0x20);

        driver.next_command(None).unwrap().unwrap();
        // SELECT came back 6A82: the GET STATUS step must not run
        let next = driver
            .next_command(Some(&Response::status_only(0x6A82u16)))
            .unwrap();
        assert!(next.is_none());
        assert!(driver.is_complete());
    }

    #[test]
    fn secure_channel_flow_produces_wrapped_commands() {
        use ramb_scp::CardChannel;

        let script = ProvisioningScript::authenticated_audit(ScpVariant::Scp02, SecurityLevel::Mac);
        let mut driver = ScriptDriver::new(script, keys(), 0x20);

        // SELECT
        let select = driver.next_command(None).unwrap().unwrap();
        assert_eq!(select.ins, gp::ins::SELECT);

        // INITIALIZE UPDATE
        let init = driver
            .next_command(Some(&Response::success(Bytes::new())))
            .unwrap()
            .unwrap();
        assert_eq!(init.ins, gp::ins::INITIALIZE_UPDATE);
        let host_challenge: [u8; 8] = init.data.as_deref().unwrap().try_into().unwrap();

        // Card side answers
        let (mut card, payload) = CardChannel::respond(
            ScpVariant::Scp02,
            &keys(),
            [0u8; 10],
            0x20,
            hex!("0001"),
            host_challenge,
        );

        // EXTERNAL AUTHENTICATE, wrapped
        let ext_auth = driver
            .next_command(Some(&Response::success(payload)))
            .unwrap()
            .unwrap();
        assert_eq!(ext_auth.ins, gp::ins::EXTERNAL_AUTHENTICATE);
        assert_eq!(ext_auth.cla & gp::cla::SECURE, gp::cla::SECURE);

        let unwrapped = card.unwrap_command(&ext_auth).unwrap();
        card.verify_host_cryptogram(unwrapped.data.as_deref().unwrap())
            .unwrap();
        card.activate(SecurityLevel::Mac).unwrap();

        // First GET STATUS arrives wrapped and verifies on the card side
        let status_cmd = driver
            .next_command(Some(&Response::success(Bytes::new())))
            .unwrap()
            .unwrap();
        assert_eq!(status_cmd.ins, gp::ins::GET_STATUS);
        let clear = card.unwrap_command(&status_cmd).unwrap();
        assert_eq!(clear.p1, gp::get_status_p1::ISSUER_SECURITY_DOMAIN);
    }

    #[test]
    fn bad_cryptogram_is_fatal() {
        let script = ProvisioningScript::new(vec![Step::OpenSecureChannel {
            variant: ScpVariant::Scp02,
            level: SecurityLevel::Mac,
        }]);
        let mut driver = ScriptDriver::new(script, keys(), 0x20);
        driver.next_command(None).unwrap().unwrap();

        // 28 bytes of garbage in place of a valid INITIALIZE UPDATE payload
        let garbage = Response::success(Bytes::copy_from_slice(&[0xAA; 28]));
        assert!(driver.next_command(Some(&garbage)).is_err());
    }
}
