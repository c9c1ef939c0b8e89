//! frerflash-core - SJA1110 FRER configuration images and upload protocol
//!
//! Builds the two flash images an SJA1110-based TSN switch consumes — the
//! microcontroller firmware and the static switch configuration — from a set
//! of IEEE 802.1CB frame replication streams, validates and repairs existing
//! images, and drives them onto a target through a pluggable [`Transport`].
//!
//! Transports live in their own crates (`frerflash-serial`, `frerflash-spi`,
//! `frerflash-sysfs`); this crate only defines the trait and the protocol
//! that runs on top of it.
//!
//! # Example
//!
//! ```ignore
//! use frerflash_core::{
//!     image::ImageBuilder,
//!     layout::MemoryLayout,
//!     stream::{DeviceModel, ReplicationStream},
//! };
//!
//! let device = DeviceModel::goldbox();
//! let stream = ReplicationStream::builder(1)
//!     .ingress(2)
//!     .egress_ports([3u8, 4])
//!     .vlan(100)
//!     .build(&device)?;
//!
//! let layout = MemoryLayout::sja1110_rev_b();
//! let image = ImageBuilder::new(&layout).build_switch(&[stream])?;
//! image.write_to("sja1110_switch.bin")?;
//! # Ok::<(), frerflash_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod image;
pub mod layout;
pub mod stream;
pub mod tables;
pub mod transport;
pub mod upload;

pub use error::{Error, Result};
pub use image::{EncodedImage, ImageBuilder, ImageKind};
pub use layout::MemoryLayout;
pub use stream::{DeviceModel, PortId, ReplicationStream};
pub use transport::{Transport, TransportKind};
pub use upload::{CancelToken, NoProgress, UploadOptions, UploadReport, UploadSession, UploadState};
