//! Replication stream model
//!
//! A [`ReplicationStream`] describes one FRER replication intent: frames
//! matching a VLAN/priority/ingress-port triple are tagged with an R-TAG
//! sequence number and replicated to a set of egress ports. Streams are
//! validated against a [`DeviceModel`] when built and consumed once by the
//! table encoders.

use crate::error::EncodingError;
use core::fmt;

/// R-TAG ethertype inserted by a replication-capable talker (IEEE 802.1CB)
pub const RTAG_ETHERTYPE: u16 = 0xF1C1;

/// A physical or internal switch port
///
/// Validity is device-specific; ports at or above the device's port count
/// belong to a collaborator device and are rejected by the encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(pub u8);

impl PortId {
    /// Raw port index
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

impl From<u8> for PortId {
    fn from(p: u8) -> Self {
        PortId(p)
    }
}

/// The port domain of a target switch
///
/// Gives stream validation its notion of which ports exist and which port
/// talks to the local CPU (host) and to a chained switch (cascade).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    /// Number of ports, valid indices are `0..port_count`
    pub port_count: u8,
    /// Port connected to the local CPU
    pub host_port: PortId,
    /// Port used to chain multiple switches
    pub cascade_port: PortId,
}

impl DeviceModel {
    /// SJA1110 on the S32G Gold Box: 11 ports, port 0 is the PFE/CPU
    /// attachment, port 10 is the RGMII host/cascade port.
    pub const fn goldbox() -> Self {
        Self {
            port_count: 11,
            host_port: PortId(10),
            cascade_port: PortId(10),
        }
    }

    /// Whether `port` is a valid port on this device
    pub fn contains(&self, port: PortId) -> bool {
        port.0 < self.port_count
    }

    fn check(&self, port: PortId) -> Result<(), EncodingError> {
        if self.contains(port) {
            Ok(())
        } else {
            Err(EncodingError::InvalidPort {
                port: port.0,
                port_count: self.port_count,
            })
        }
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::goldbox()
    }
}

/// One FRER replication intent
///
/// Construct through [`ReplicationStream::builder`], which validates the
/// fields against a [`DeviceModel`] up front. Streams carry no identity
/// beyond the current build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationStream {
    /// Stream handle, unique within one image
    pub id: u16,
    /// Port on which member frames arrive
    pub ingress_port: PortId,
    /// Ordered set of ports the frame is replicated to (non-empty)
    pub egress_ports: Vec<PortId>,
    /// VLAN id of the stream (0-4095)
    pub vlan_id: u16,
    /// PCP priority (0-7)
    pub priority: u8,
    /// Sequence recovery history window length
    pub history_length: u16,
    /// Recovery reset timeout in milliseconds
    pub reset_timeout_ms: u16,
    /// Whether the stream's table entries are marked active
    pub enabled: bool,
    /// Human-readable label, used only for logging
    pub name: String,
}

impl ReplicationStream {
    /// Start building a stream with the given handle
    pub fn builder(id: u16) -> StreamBuilder {
        StreamBuilder::new(id)
    }
}

/// Builder for [`ReplicationStream`]
///
/// Required fields are the ingress port and at least one egress port;
/// everything else has the defaults the SJA1110 tooling ships with
/// (history 16, reset timeout 100 ms, enabled).
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    id: u16,
    ingress_port: Option<PortId>,
    egress_ports: Vec<PortId>,
    vlan_id: u16,
    priority: u8,
    history_length: u16,
    reset_timeout_ms: u16,
    enabled: bool,
    name: Option<String>,
}

impl StreamBuilder {
    fn new(id: u16) -> Self {
        Self {
            id,
            ingress_port: None,
            egress_ports: Vec::new(),
            vlan_id: 0,
            priority: 7,
            history_length: 16,
            reset_timeout_ms: 100,
            enabled: true,
            name: None,
        }
    }

    /// Set the ingress port (required)
    pub fn ingress(mut self, port: impl Into<PortId>) -> Self {
        self.ingress_port = Some(port.into());
        self
    }

    /// Add one egress port
    pub fn egress(mut self, port: impl Into<PortId>) -> Self {
        self.egress_ports.push(port.into());
        self
    }

    /// Add several egress ports
    pub fn egress_ports<I, P>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PortId>,
    {
        self.egress_ports.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Set the VLAN id (0-4095)
    pub fn vlan(mut self, vlan_id: u16) -> Self {
        self.vlan_id = vlan_id;
        self
    }

    /// Set the PCP priority (0-7)
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the sequence recovery history length
    pub fn history(mut self, length: u16) -> Self {
        self.history_length = length;
        self
    }

    /// Set the recovery reset timeout
    pub fn reset_timeout_ms(mut self, ms: u16) -> Self {
        self.reset_timeout_ms = ms;
        self
    }

    /// Encode the stream's entries with the enable flag cleared
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Attach a label for logging
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validate against the device and produce the stream
    ///
    /// Duplicate egress ports are dropped (first occurrence wins) so the
    /// rendered port mask matches the declared set exactly.
    pub fn build(self, device: &DeviceModel) -> Result<ReplicationStream, EncodingError> {
        let ingress = self
            .ingress_port
            .ok_or(EncodingError::MissingIngressPort(self.id))?;
        device.check(ingress)?;

        if self.egress_ports.is_empty() {
            return Err(EncodingError::EmptyEgressSet(self.id));
        }
        let mut egress = Vec::with_capacity(self.egress_ports.len());
        for port in self.egress_ports {
            device.check(port)?;
            if !egress.contains(&port) {
                egress.push(port);
            }
        }

        if self.vlan_id > 4095 {
            return Err(EncodingError::InvalidVlan(self.vlan_id));
        }
        if self.priority > 7 {
            return Err(EncodingError::InvalidPriority(self.priority));
        }

        let name = self
            .name
            .unwrap_or_else(|| format!("stream-{}", self.id));

        log::debug!(
            "stream {} ({}): {} -> {:?}, vlan {}, prio {}",
            self.id,
            name,
            ingress,
            egress.iter().map(|p| p.0).collect::<Vec<_>>(),
            self.vlan_id,
            self.priority
        );

        Ok(ReplicationStream {
            id: self.id,
            ingress_port: ingress,
            egress_ports: egress,
            vlan_id: self.vlan_id,
            priority: self.priority,
            history_length: self.history_length,
            reset_timeout_ms: self.reset_timeout_ms,
            enabled: self.enabled,
            name,
        })
    }
}
