//! Instance configuration and the DC address table.

use std::time::Duration;

use mtp_session::PersistedState;
use mtp_tl::{enums, types};

use crate::retry::{ReconnectConfig, RetryConfig};
use crate::socks5::Socks5Config;

// ─── TransportKind ────────────────────────────────────────────────────────────

/// Which MTProto transport framing to use on every connection.
///
/// | Kind | Init bytes | Notes |
/// |------|-----------|-------|
/// | `Abridged` | `0xef` | Smallest overhead |
/// | `Intermediate` | `0xeeeeeeee` | Better proxy compat |
/// | `Full` | none | Adds seqno + CRC32 |
/// | `Obfuscated` | random 64B | Bypasses DPI / MTProxy |
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// MTProto [Abridged] transport: length prefix is 1 or 4 bytes.
    ///
    /// [Abridged]: https://core.telegram.org/mtproto/mtproto-transports#abridged
    #[default]
    Abridged,
    /// MTProto [Intermediate] transport: 4-byte LE length prefix.
    ///
    /// [Intermediate]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
    Intermediate,
    /// MTProto [Full] transport: 4-byte length + seqno + CRC32.
    ///
    /// [Full]: https://core.telegram.org/mtproto/mtproto-transports#full
    Full,
    /// [Obfuscated2] transport: AES-CTR over Abridged framing.
    ///
    /// `secret` is the 16-byte proxy secret, or `None` for keyless obfuscation.
    ///
    /// [Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation
    Obfuscated { secret: Option<[u8; 16]> },
}

// ─── InitParams ───────────────────────────────────────────────────────────────

/// Fields of `initConnection`, sent once per session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitParams {
    pub api_id:           i32,
    pub device_model:     String,
    pub system_version:   String,
    pub app_version:      String,
    pub system_lang_code: String,
    pub lang_pack:        String,
    pub lang_code:        String,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            api_id:           0,
            device_model:     std::env::consts::OS.to_string(),
            system_version:   std::env::consts::ARCH.to_string(),
            app_version:      env!("CARGO_PKG_VERSION").to_string(),
            system_lang_code: "en".to_string(),
            lang_pack:        String::new(),
            lang_code:        "en".to_string(),
        }
    }
}

// ─── DC addresses ─────────────────────────────────────────────────────────────

/// One address a DC can be reached at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcAddress {
    pub dc_id:      i32,
    /// `host:port`; IPv6 hosts are bracketed.
    pub addr:       String,
    pub ipv6:       bool,
    pub media_only: bool,
}

impl DcAddress {
    pub fn new(dc_id: i32, addr: impl Into<String>) -> Self {
        Self { dc_id, addr: addr.into(), ipv6: false, media_only: false }
    }
}

/// Where the current address table came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Hardcoded or user-supplied addresses; discovery has not run yet.
    Bootstrap,
    /// Learned from `help.getConfig`.
    Server { date: i32, expires: i32 },
}

/// Read-only snapshot of the known DC addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcConfig {
    pub test_mode: bool,
    pub source:    ConfigSource,
    pub addresses: Vec<DcAddress>,
}

impl DcConfig {
    /// The hardcoded production or test DC table.
    pub fn bootstrap(test_mode: bool) -> Self {
        let table: &[(i32, &str)] = if test_mode {
            &[
                (1, "149.154.175.10:443"),
                (2, "149.154.167.40:443"),
                (3, "149.154.175.117:443"),
            ]
        } else {
            &[
                (1, "149.154.175.53:443"),
                (2, "149.154.167.51:443"),
                (3, "149.154.175.100:443"),
                (4, "149.154.167.91:443"),
                (5, "91.108.56.130:443"),
            ]
        };
        Self {
            test_mode,
            source: ConfigSource::Bootstrap,
            addresses: table.iter().map(|&(id, addr)| DcAddress::new(id, addr)).collect(),
        }
    }

    /// Build the table from a `config` answer. CDN and TCPO-only endpoints
    /// are skipped; IPv6 ones only when allowed.
    pub fn from_server(cfg: &types::Config, allow_ipv6: bool) -> Self {
        let addresses = cfg
            .dc_options
            .iter()
            .map(|opt| {
                let enums::DcOption::DcOption(o) = opt;
                o
            })
            .filter(|o| !o.cdn && !o.tcpo_only && (allow_ipv6 || !o.ipv6))
            .map(|o| DcAddress {
                dc_id: o.id,
                addr: if o.ipv6 {
                    format!("[{}]:{}", o.ip_address, o.port)
                } else {
                    format!("{}:{}", o.ip_address, o.port)
                },
                ipv6: o.ipv6,
                media_only: o.media_only,
            })
            .collect();
        Self {
            test_mode: cfg.test_mode,
            source: ConfigSource::Server { date: cfg.date, expires: cfg.expires },
            addresses,
        }
    }

    /// Best address for `dc_id`. Media connections prefer media-only
    /// endpoints; everything else avoids them.
    pub fn address(&self, dc_id: i32, media: bool) -> Option<&DcAddress> {
        let mut candidates = self.addresses.iter().filter(|a| a.dc_id == dc_id);
        if media {
            let all: Vec<_> = candidates.collect();
            all.iter()
                .find(|a| a.media_only)
                .or_else(|| all.first())
                .copied()
        } else {
            candidates.find(|a| !a.media_only)
        }
    }

    /// Distinct DC ids, in table order.
    pub fn dc_ids(&self) -> Vec<i32> {
        let mut ids = Vec::new();
        for a in &self.addresses {
            if !ids.contains(&a.dc_id) {
                ids.push(a.dc_id);
            }
        }
        ids
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`crate::Instance::connect`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Use Telegram's test DCs.
    pub test_mode:       bool,
    /// Replace the hardcoded bootstrap addresses.
    pub dc_addresses:    Option<Vec<DcAddress>>,
    /// DC used for [`crate::Target::Main`] unless `state` says otherwise.
    pub main_dc:         i32,
    pub transport:       TransportKind,
    /// Optional SOCKS5 proxy: every connection is tunnelled through it.
    pub proxy:           Option<Socks5Config>,
    /// Allow IPv6 DC addresses when populating the DC table (default: false).
    pub allow_ipv6:      bool,
    pub init:            InitParams,
    pub retry:           RetryConfig,
    pub reconnect:       ReconnectConfig,
    /// Keep-alive period of every ready connection.
    pub ping_interval:   Duration,
    /// Bound on TCP connect plus transport and key-exchange handshake.
    pub connect_timeout: Duration,
    /// Keys and DC metadata from a previous run.
    pub state:           Option<PersistedState>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            test_mode:       false,
            dc_addresses:    None,
            main_dc:         2,
            transport:       TransportKind::Abridged,
            proxy:           None,
            allow_ipv6:      false,
            init:            InitParams::default(),
            retry:           RetryConfig::default(),
            reconnect:       ReconnectConfig::default(),
            ping_interval:   Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            state:           None,
        }
    }
}

impl Config {
    /// Address table to start from.
    pub fn bootstrap_dc_config(&self) -> DcConfig {
        match &self.dc_addresses {
            Some(addresses) => DcConfig {
                test_mode: self.test_mode,
                source: ConfigSource::Bootstrap,
                addresses: addresses.clone(),
            },
            None => DcConfig::bootstrap(self.test_mode),
        }
    }

    /// Main DC, preferring the restored state.
    pub fn effective_main_dc(&self) -> i32 {
        self.state.as_ref().map_or(self.main_dc, |s| s.main_dc)
    }

    /// The id announced during key exchange: test DCs are offset by 10000
    /// and media-only endpoints are negative.
    pub fn dh_dc_id(&self, dc_id: i32, media: bool) -> i32 {
        let id = if self.test_mode { dc_id + 10000 } else { dc_id };
        if media { -id } else { id }
    }

    /// Idle time after which a silent connection is considered dead.
    pub(crate) fn idle_timeout(&self) -> Duration {
        self.ping_interval * 2 + self.connect_timeout
    }
}
