//! Sector and data-packet framing.
//!
//! The image is cut into 4096-byte sectors, and every sector into packets
//! that fit the transport's write limit:
//!
//! ```text
//! Non-final packet:
//! +--------------+-----+-----------------+
//! | Sector index | Seq |     Payload     |
//! +--------------+-----+-----------------+
//! |    2 (LE)    |  1  | <= size - 3     |
//! +--------------+-----+-----------------+
//!
//! Final packet of a sector:
//! +--------------+------+-----------------+------------+
//! | Sector index | 0xFF |     Payload     | Sector CRC |
//! +--------------+------+-----------------+------------+
//! |    2 (LE)    |  1   | <= size - 3     |   2 (LE)   |
//! +--------------+------+-----------------+------------+
//! ```
//!
//! The sector CRC is a running CRC-16 folded over every payload chunk of the
//! sector, which equals the CRC of the whole sector.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16;
use byteorder::{LittleEndian, WriteBytesExt};

/// Flash sector size used by the receiver.
pub const SECTOR_SIZE: usize = 4096;

/// Default (and largest) packet size excluding the sector CRC trailer.
pub const MAX_PACKET_SIZE: usize = 510;

/// Smallest packet size that keeps a sector within 255 sequence numbers.
pub const MIN_PACKET_SIZE: usize = 20;

/// Sector index + sequence byte.
pub const PACKET_HEADER_LEN: usize = 3;

/// Length of the sector CRC trailer.
pub const SECTOR_CRC_LEN: usize = 2;

/// Sequence byte marking the last packet of a sector.
pub const LAST_PACKET_MARKER: u8 = 0xFF;

/// Largest image the 32-bit size field and 16-bit sector index can describe.
pub const MAX_IMAGE_LEN: usize = (u16::MAX as usize + 1) * SECTOR_SIZE;

/// Payload bytes carried by a packet of `packet_size` bytes.
pub const fn payload_capacity(packet_size: usize) -> usize {
    packet_size - PACKET_HEADER_LEN
}

/// Check that `image` can be described by the wire format.
pub fn validate_image(image: &[u8]) -> Result<()> {
    if image.is_empty() {
        return Err(Error::InvalidImage("image is empty".into()));
    }
    if image.len() > MAX_IMAGE_LEN || u32::try_from(image.len()).is_err() {
        return Err(Error::InvalidImage(format!(
            "image is {} bytes, the protocol allows at most {} bytes",
            image.len(),
            MAX_IMAGE_LEN.min(u32::MAX as usize)
        )));
    }
    Ok(())
}

/// Check that `packet_size` is usable.
pub fn validate_packet_size(packet_size: usize) -> Result<()> {
    if (MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&packet_size) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "packet size {packet_size} is outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"
        )))
    }
}

/// A contiguous, non-overlapping view of at most [`SECTOR_SIZE`] image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector<'a> {
    /// Sector index, echoed by the receiver in its acknowledgment.
    pub index: u16,
    /// Offset of the first byte within the image.
    pub offset: usize,
    /// Sector contents.
    pub data: &'a [u8],
}

impl<'a> Sector<'a> {
    /// Number of bytes in the sector.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the sector holds no bytes (never true for sectors of a valid image).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// CRC of the whole sector, as carried by its final packet.
    pub fn crc(&self) -> u16 {
        crc16(0, self.data)
    }

    /// Split the sector into packets of at most `packet_size` wire bytes.
    pub fn packets(&self, packet_size: usize) -> Packets<'a> {
        Packets {
            sector: *self,
            max_payload: payload_capacity(packet_size),
            pos: 0,
            sequence: 0,
            crc: 0,
        }
    }
}

/// Iterate over the sectors of `image` in order.
///
/// Call [`validate_image`] first; indices past `u16::MAX` are never produced
/// for a valid image.
pub fn sectors(image: &[u8]) -> impl Iterator<Item = Sector<'_>> {
    image
        .chunks(SECTOR_SIZE)
        .enumerate()
        .map(|(i, data)| Sector {
            index: i as u16,
            offset: i * SECTOR_SIZE,
            data,
        })
}

/// One data packet of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket<'a> {
    /// Index of the sector this packet belongs to.
    pub sector_index: u16,
    /// Sequence byte (`0..=254`, or [`LAST_PACKET_MARKER`]).
    pub sequence: u8,
    /// Offset of the payload within its sector.
    pub offset_in_sector: usize,
    /// Payload bytes.
    pub payload: &'a [u8],
    /// Sector CRC, present only on the final packet.
    pub sector_crc: Option<u16>,
}

impl DataPacket<'_> {
    /// Whether this packet closes its sector.
    pub fn is_last(&self) -> bool {
        self.sector_crc.is_some()
    }

    /// Size of the encoded packet.
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_LEN
            + self.payload.len()
            + if self.is_last() { SECTOR_CRC_LEN } else { 0 }
    }

    /// Encode the packet.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.write_u16::<LittleEndian>(self.sector_index).unwrap();
        buf.push(self.sequence);
        buf.extend_from_slice(self.payload);
        if let Some(crc) = self.sector_crc {
            buf.write_u16::<LittleEndian>(crc).unwrap();
        }
        buf
    }
}

/// Iterator over the packets of one sector.
#[derive(Debug, Clone)]
pub struct Packets<'a> {
    sector: Sector<'a>,
    max_payload: usize,
    pos: usize,
    sequence: u8,
    crc: u16,
}

impl<'a> Iterator for Packets<'a> {
    type Item = DataPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.sector.data;
        if self.pos >= data.len() {
            return None;
        }

        let offset = self.pos;
        let take = self.max_payload.min(data.len() - offset);
        let payload = &data[offset..offset + take];
        self.pos += take;
        self.crc = crc16(self.crc, payload);

        let exhausted = self.pos == data.len();
        let cap_reached = self.pos >= SECTOR_SIZE;
        // A sector never exceeds SECTOR_SIZE, so reaching the cap means the
        // sector is exhausted as well.
        debug_assert!(
            !cap_reached || exhausted,
            "sector {} reached {} bytes before its end",
            self.sector.index,
            SECTOR_SIZE
        );

        let packet = if exhausted || cap_reached {
            DataPacket {
                sector_index: self.sector.index,
                sequence: LAST_PACKET_MARKER,
                offset_in_sector: offset,
                payload,
                sector_crc: Some(self.crc),
            }
        } else {
            debug_assert!(self.sequence < LAST_PACKET_MARKER);
            let sequence = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);
            DataPacket {
                sector_index: self.sector.index,
                sequence,
                offset_in_sector: offset,
                payload,
                sector_crc: None,
            }
        };
        Some(packet)
    }
}

/// Layout of one sector in a [`TransferPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SectorPlan {
    /// Sector index.
    pub index: u16,
    /// Offset within the image.
    pub offset: usize,
    /// Sector length in bytes.
    pub len: usize,
    /// Payload size of each packet, in send order.
    pub packet_payloads: Vec<usize>,
    /// Sector CRC carried by the final packet.
    pub crc: u16,
}

/// Offline description of how an image will be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TransferPlan {
    /// Image length.
    pub total: usize,
    /// Packet size used for the plan.
    pub packet_size: usize,
    /// Per-sector layout.
    pub sectors: Vec<SectorPlan>,
}

impl TransferPlan {
    /// Total number of packets.
    pub fn packet_count(&self) -> usize {
        self.sectors.iter().map(|s| s.packet_payloads.len()).sum()
    }

    /// Total number of bytes written to the data channel.
    pub fn wire_bytes(&self) -> usize {
        self.sectors
            .iter()
            .map(|s| {
                s.packet_payloads.len() * PACKET_HEADER_LEN + s.len + SECTOR_CRC_LEN
            })
            .sum()
    }
}

/// Compute the sector/packet layout of `image` without sending anything.
pub fn plan(image: &[u8], packet_size: usize) -> Result<TransferPlan> {
    validate_image(image)?;
    validate_packet_size(packet_size)?;

    let sectors = sectors(image)
        .map(|sector| {
            let packets: Vec<DataPacket<'_>> = sector.packets(packet_size).collect();
            SectorPlan {
                index: sector.index,
                offset: sector.offset,
                len: sector.len(),
                packet_payloads: packets.iter().map(|p| p.payload.len()).collect(),
                crc: packets
                    .last()
                    .and_then(|p| p.sector_crc)
                    .unwrap_or_else(|| sector.crc()),
            }
        })
        .collect();

    Ok(TransferPlan {
        total: image.len(),
        packet_size,
        sectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_payload_capacity() {
        assert_eq!(payload_capacity(MAX_PACKET_SIZE), 507);
    }

    #[test]
    fn test_sectors_cover_image_exactly() {
        for len in [1, 4095, 4096, 4097, 5000, 3 * 4096, 3 * 4096 + 1] {
            let img = image(len);
            let joined: Vec<u8> = sectors(&img).flat_map(|s| s.data.to_vec()).collect();
            assert_eq!(joined, img, "len {len}");
            for (i, s) in sectors(&img).enumerate() {
                assert_eq!(usize::from(s.index), i);
                assert_eq!(s.offset, i * SECTOR_SIZE);
                assert!(s.len() <= SECTOR_SIZE);
            }
        }
    }

    #[test]
    fn test_packets_reconstruct_image_with_one_final_per_sector() {
        for len in [1, 506, 507, 508, 4096, 4097, 5000, 12_345] {
            let img = image(len);
            let mut rebuilt = Vec::new();
            for sector in sectors(&img) {
                let packets: Vec<_> = sector.packets(MAX_PACKET_SIZE).collect();
                let finals = packets.iter().filter(|p| p.is_last()).count();
                assert_eq!(finals, 1, "len {len}, sector {}", sector.index);
                assert!(packets.last().is_some_and(DataPacket::is_last));
                let sum: usize = packets.iter().map(|p| p.payload.len()).sum();
                assert_eq!(sum, sector.len());
                for p in &packets {
                    rebuilt.extend_from_slice(p.payload);
                }
            }
            assert_eq!(rebuilt, img, "len {len}");
        }
    }

    #[test]
    fn test_sector_crc_matches_single_shot() {
        let img = image(9000);
        for sector in sectors(&img) {
            let last = sector.packets(MAX_PACKET_SIZE).last().unwrap();
            assert_eq!(last.sector_crc, Some(crc16(0, sector.data)));
        }
    }

    #[test]
    fn test_sequence_numbers() {
        let img = image(4096);
        let sector = sectors(&img).next().unwrap();
        let seqs: Vec<u8> = sector.packets(MAX_PACKET_SIZE).map(|p| p.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5, 6, 7, 0xFF]);
    }

    #[test]
    fn test_single_packet_sector_is_final() {
        let img = image(100);
        let sector = sectors(&img).next().unwrap();
        let packets: Vec<_> = sector.packets(MAX_PACKET_SIZE).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sequence, LAST_PACKET_MARKER);
        assert_eq!(packets[0].wire_len(), 105);
    }

    #[test]
    fn test_encode_non_final_packet() {
        let payload = [0xAA, 0xBB, 0xCC];
        let packet = DataPacket {
            sector_index: 0x0102,
            sequence: 4,
            offset_in_sector: 0,
            payload: &payload,
            sector_crc: None,
        };
        assert_eq!(packet.encode(), vec![0x02, 0x01, 0x04, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_encode_final_packet_appends_crc() {
        let payload = [0x10, 0x20];
        let packet = DataPacket {
            sector_index: 7,
            sequence: LAST_PACKET_MARKER,
            offset_in_sector: 1014,
            payload: &payload,
            sector_crc: Some(0xA1B2),
        };
        assert_eq!(
            packet.encode(),
            vec![0x07, 0x00, 0xFF, 0x10, 0x20, 0xB2, 0xA1]
        );
        assert_eq!(packet.encode().len(), packet.wire_len());
    }

    #[test]
    fn test_plan_for_5000_bytes() {
        let img = vec![0u8; 5000];
        let plan = plan(&img, MAX_PACKET_SIZE).unwrap();
        assert_eq!(plan.sectors.len(), 2);
        assert_eq!(plan.sectors[0].packet_payloads.len(), 9);
        assert_eq!(plan.sectors[0].packet_payloads[..8], [507; 8]);
        assert_eq!(plan.sectors[0].packet_payloads[8], 40);
        assert_eq!(plan.sectors[1].packet_payloads, vec![507, 397]);
        assert_eq!(plan.packet_count(), 11);
        assert_eq!(plan.sectors[1].crc, crc16(0, &img[4096..]));
        assert_eq!(plan.wire_bytes(), 5000 + 11 * 3 + 2 * 2);
    }

    #[test]
    fn test_smallest_packet_size_fits_sequence_space() {
        let img = image(SECTOR_SIZE);
        let sector = sectors(&img).next().unwrap();
        let packets: Vec<_> = sector.packets(MIN_PACKET_SIZE).collect();
        assert!(packets.len() <= 256);
        assert!(packets[..packets.len() - 1]
            .iter()
            .all(|p| p.sequence < LAST_PACKET_MARKER));
    }

    #[test]
    fn test_validate_image() {
        assert!(matches!(validate_image(&[]), Err(Error::InvalidImage(_))));
        assert!(validate_image(&[0]).is_ok());
    }

    #[test]
    fn test_validate_packet_size() {
        assert!(validate_packet_size(MAX_PACKET_SIZE).is_ok());
        assert!(validate_packet_size(MIN_PACKET_SIZE).is_ok());
        assert!(validate_packet_size(MIN_PACKET_SIZE - 1).is_err());
        assert!(validate_packet_size(MAX_PACKET_SIZE + 1).is_err());
    }
}
