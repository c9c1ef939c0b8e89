//! Image assembly
//!
//! Builds the two flash images the target consumes. Build order is a fixed
//! contract: marker, device id and flags, zero padding up to each section
//! offset, encoded tables, 0xFF (erase value) padding up to the trailer, and
//! the CRC32 trailer as the very last four bytes, computed over everything
//! before it. Output length always equals the layout's declared image size.

use crate::error::Result;
use crate::image::{ConfigFlags, EncodedImage, ImageKind};
use crate::layout::{MemoryLayout, SectionKind, IMAGE_HEADER_LEN};
use crate::stream::{DeviceModel, ReplicationStream};
use crate::tables;

use super::crc::image_crc;

/// UC firmware header words after marker and device id
const UC_VERSION: u32 = 0x0001_0001;
const UC_LOAD_ADDR: u32 = 0x0000_8000;

/// Builder for SJA1110 flash images
///
/// Holds the layout and device the streams are encoded against. General
/// parameter values (host/cascade port) come from the [`DeviceModel`].
pub struct ImageBuilder<'a> {
    layout: &'a MemoryLayout,
    device: DeviceModel,
    flags: ConfigFlags,
    frame_replication: bool,
}

impl<'a> ImageBuilder<'a> {
    /// Builder for the given layout, targeting the Gold Box port domain
    /// with the default header flags
    pub fn new(layout: &'a MemoryLayout) -> Self {
        Self {
            layout,
            device: DeviceModel::goldbox(),
            flags: ConfigFlags::default(),
            frame_replication: true,
        }
    }

    /// Use a different port domain than the Gold Box default
    pub fn with_device(mut self, device: DeviceModel) -> Self {
        self.device = device;
        self
    }

    /// Override the configuration header flags
    pub fn with_flags(mut self, flags: ConfigFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Clear FRMREPEN, disabling frame replication globally
    pub fn without_frame_replication(mut self) -> Self {
        self.frame_replication = false;
        self
    }

    /// Build the switch configuration image
    ///
    /// All tables are encoded before the first byte of the image buffer is
    /// touched, so an encoding error never leaves a partial image behind.
    pub fn build_switch(&self, streams: &[ReplicationStream]) -> Result<EncodedImage> {
        self.layout.validate()?;
        let order = self.layout.byte_order;
        let size = self.layout.switch_image_size;

        let replication = tables::encode_replication(streams, self.layout, &self.device)?;
        let recovery = tables::encode_recovery(streams, self.layout, &self.device)?;
        let identification = tables::encode_identification(streams, self.layout, &self.device)?;
        let vlan = tables::encode_vlan(streams, self.layout, &self.device)?;

        let mut buf = vec![0u8; size];
        buf[0..8].copy_from_slice(&self.layout.marker);
        buf[8..12].copy_from_slice(&order.u32_bytes(self.layout.device_id));
        buf[12..16].copy_from_slice(&order.u32_bytes(self.flags.bits()));

        // General parameters: FRMREPEN word plus host and cascade port,
        // zero padded to the section's entry size
        let gp = self.layout.section(SectionKind::GeneralParams)?;
        let frmrepen = u32::from(self.frame_replication);
        buf[gp.offset..gp.offset + 4].copy_from_slice(&order.u32_bytes(frmrepen));
        buf[gp.offset + 4] = self.device.host_port.index();
        buf[gp.offset + 5] = self.device.cascade_port.index();

        let mut tail_start = IMAGE_HEADER_LEN;
        for (kind, bytes) in [
            (SectionKind::VlanLookup, &vlan),
            (SectionKind::SeqGeneration, &replication),
            (SectionKind::IndividualRecovery, &recovery),
            (SectionKind::Dpi, &identification),
        ] {
            let section = self.layout.section(kind)?;
            buf[section.offset..section.offset + bytes.len()].copy_from_slice(bytes);
            tail_start = tail_start.max(section.end());
        }
        tail_start = tail_start.max(gp.end());

        // Erase-value padding from the last reserved region to the trailer
        buf[tail_start..size - 4].fill(0xFF);

        let crc = image_crc(&buf[..size - 4]);
        buf[size - 4..].copy_from_slice(&crc.to_le_bytes());

        log::info!(
            "built switch configuration: {} streams, {} bytes, CRC 0x{:08X}",
            streams.len(),
            size,
            crc
        );
        Ok(EncodedImage::new(ImageKind::SwitchConfig, buf))
    }

    /// Build the microcontroller firmware image
    ///
    /// Layout: marker, device id, version/load-address header, FRER stream
    /// processing rules, 0xFF padding, CRC trailer.
    pub fn build_uc(&self, streams: &[ReplicationStream]) -> Result<EncodedImage> {
        self.layout.validate()?;
        let order = self.layout.byte_order;
        let size = self.layout.uc_image_size;

        // Rules payload first so errors abort before allocation
        let rules = self.encode_uc_rules(streams)?;

        let mut buf = vec![0u8; size];
        buf[0..8].copy_from_slice(&self.layout.marker);
        buf[8..12].copy_from_slice(&order.u32_bytes(self.layout.device_id));
        buf[12..16].copy_from_slice(&order.u32_bytes(UC_VERSION));
        buf[16..20].copy_from_slice(&order.u32_bytes(UC_LOAD_ADDR));
        buf[20..24].copy_from_slice(&order.u32_bytes(0)); // entry point
        buf[24..28].copy_from_slice(&order.u32_bytes(u32::from(self.frame_replication)));
        buf[28..32].copy_from_slice(&order.u32_bytes(streams.len() as u32));

        let payload_start = 32;
        buf[payload_start..payload_start + rules.len()].copy_from_slice(&rules);

        buf[payload_start + rules.len()..size - 4].fill(0xFF);

        let crc = image_crc(&buf[..size - 4]);
        buf[size - 4..].copy_from_slice(&crc.to_le_bytes());

        log::info!(
            "built UC firmware: {} streams, {} bytes, CRC 0x{:08X}",
            streams.len(),
            size,
            crc
        );
        Ok(EncodedImage::new(ImageKind::UcFirmware, buf))
    }

    /// Per-stream processing rules for the UC subsystem: 16-byte records of
    /// stream id, VLAN, priority, ingress port and the egress port list.
    fn encode_uc_rules(&self, streams: &[ReplicationStream]) -> Result<Vec<u8>> {
        let order = self.layout.byte_order;
        let mut sorted: Vec<&ReplicationStream> = streams.iter().collect();
        sorted.sort_by_key(|s| s.id);

        let mut rules = Vec::with_capacity(sorted.len() * 16);
        for stream in sorted {
            // Reuse the table encoder's port checks
            tables::port_mask(&stream.egress_ports, &self.device)?;

            let start = rules.len();
            rules.extend_from_slice(&order.u16_bytes(stream.id));
            rules.extend_from_slice(&order.u16_bytes(stream.vlan_id));
            rules.push(stream.priority);
            rules.push(stream.ingress_port.index());
            rules.push(stream.egress_ports.len() as u8);
            for port in &stream.egress_ports {
                rules.push(port.index());
            }
            rules.resize(start + 16, 0);
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::validate;
    use crate::layout::SectionKind;

    fn sample_streams(device: &DeviceModel) -> Vec<ReplicationStream> {
        vec![
            ReplicationStream::builder(1)
                .ingress(2)
                .egress_ports([3u8, 4])
                .vlan(100)
                .priority(7)
                .build(device)
                .unwrap(),
            ReplicationStream::builder(2)
                .ingress(5)
                .egress_ports([6u8, 7])
                .vlan(200)
                .priority(6)
                .build(device)
                .unwrap(),
        ]
    }

    #[test]
    fn switch_image_has_declared_size_for_any_stream_count() {
        let layout = MemoryLayout::sja1110_rev_b();
        let device = DeviceModel::goldbox();
        let builder = ImageBuilder::new(&layout);

        for count in [0usize, 1, 2] {
            let streams = &sample_streams(&device)[..count];
            let image = builder.build_switch(streams).unwrap();
            assert_eq!(image.len(), layout.switch_image_size);
        }

        let uc = builder.build_uc(&sample_streams(&device)).unwrap();
        assert_eq!(uc.len(), layout.uc_image_size);
    }

    #[test]
    fn replication_entry_lands_at_seq_generation_offset() {
        let layout = MemoryLayout::sja1110_rev_b();
        let device = DeviceModel::goldbox();
        let stream = ReplicationStream::builder(1)
            .ingress(2)
            .egress_ports([3u8, 4])
            .vlan(100)
            .priority(7)
            .build(&device)
            .unwrap();

        let image = ImageBuilder::new(&layout).build_switch(&[stream]).unwrap();
        let bytes = image.as_bytes();

        let offset = layout.section(SectionKind::SeqGeneration).unwrap().offset;
        assert_eq!(&bytes[offset..offset + 2], &1u16.to_le_bytes());
        assert_eq!(&bytes[offset + 2..offset + 4], &0b11000u16.to_le_bytes());

        // Trailer covers everything before it
        let crc = image_crc(&bytes[..bytes.len() - 4]);
        assert_eq!(&bytes[bytes.len() - 4..], &crc.to_le_bytes());
    }

    #[test]
    fn header_and_general_params() {
        let layout = MemoryLayout::sja1110_rev_b();
        let device = DeviceModel::goldbox();
        let image = ImageBuilder::new(&layout)
            .build_switch(&sample_streams(&device))
            .unwrap();
        let bytes = image.as_bytes();

        assert_eq!(&bytes[0..8], &layout.marker);
        assert_eq!(
            u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            layout.device_id
        );
        assert_eq!(
            u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            ConfigFlags::default().bits()
        );

        let gp = layout.section(SectionKind::GeneralParams).unwrap().offset;
        assert_eq!(u32::from_le_bytes(bytes[gp..gp + 4].try_into().unwrap()), 1);
        assert_eq!(bytes[gp + 4], 10); // host port
        assert_eq!(bytes[gp + 5], 10); // cascade port
    }

    #[test]
    fn tail_padding_is_erase_value() {
        let layout = MemoryLayout::sja1110_rev_b();
        let image = ImageBuilder::new(&layout).build_switch(&[]).unwrap();
        let bytes = image.as_bytes();
        let dpi_end = layout.section(SectionKind::Dpi).unwrap().end();
        assert!(bytes[dpi_end..bytes.len() - 4].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn build_then_validate_round_trips() {
        let layout = MemoryLayout::sja1110_rev_b();
        let device = DeviceModel::goldbox();
        let builder = ImageBuilder::new(&layout);

        let switch = builder.build_switch(&sample_streams(&device)).unwrap();
        validate(switch.as_bytes(), &layout, ImageKind::SwitchConfig).unwrap();

        let uc = builder.build_uc(&sample_streams(&device)).unwrap();
        validate(uc.as_bytes(), &layout, ImageKind::UcFirmware).unwrap();
    }

    #[test]
    fn builds_are_reproducible() {
        let layout = MemoryLayout::sja1110_rev_a();
        let device = DeviceModel::goldbox();
        let builder = ImageBuilder::new(&layout);
        let streams = sample_streams(&device);
        assert_eq!(
            builder.build_switch(&streams).unwrap(),
            builder.build_switch(&streams).unwrap()
        );
    }
}
