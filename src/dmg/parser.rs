//! UDIF disk image reader: trailer, manifest, and per-partition inflation
//! into a flat image the APFS reader can consume.

use crate::error::{Error, Result};
use crate::source::{pod_at, read_exact_at, ByteSource};
use crate::tracy;
use crate::util::{read_u32_be, read_u64_be};

use super::plist::{self, BlkxEntry};
use super::*;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;

use flate2::read::ZlibDecoder;

pub fn parse_koly_trailer(data: &[u8]) -> Result<KolyTrailer> {
    if data.len() < UDIF_TRAILER_SIZE {
        return Err(Error::NotADiskImage);
    }
    if read_u32_be(data, 0) != UDIF_KOLY_MAGIC {
        return Err(Error::NotADiskImage);
    }

    Ok(KolyTrailer {
        version:          read_u32_be(data, UDIF_KOLY_VERSION_OFFSET),
        header_size:      read_u32_be(data, UDIF_KOLY_HEADER_SIZE_OFFSET),
        flags:            read_u32_be(data, UDIF_KOLY_FLAGS_OFFSET),
        data_fork_offset: read_u64_be(data, UDIF_KOLY_DATA_FORK_OFFSET),
        data_fork_length: read_u64_be(data, UDIF_KOLY_DATA_FORK_LEN_OFFSET),
        rsrc_fork_offset: read_u64_be(data, UDIF_KOLY_RSRC_FORK_OFFSET),
        rsrc_fork_length: read_u64_be(data, UDIF_KOLY_RSRC_FORK_LEN_OFFSET),
        xml_offset:       read_u64_be(data, UDIF_KOLY_XML_OFFSET),
        xml_length:       read_u64_be(data, UDIF_KOLY_XML_LEN_OFFSET),
        image_variant:    read_u32_be(data, UDIF_KOLY_IMAGE_VARIANT_OFFSET),
        sector_count:     read_u64_be(data, UDIF_KOLY_SECTOR_COUNT_OFFSET),
    })
}

pub fn parse_block_table(data: &[u8]) -> Result<BlockTable> {
    if data.len() < UDIF_MISH_CHUNKS_OFFSET {
        return Err(Error::Manifest(format!("{} byte block table is truncated", data.len())));
    }
    let magic = read_u32_be(data, 0);
    if magic != UDIF_MISH_MAGIC {
        return Err(Error::BadMagic { expected: UDIF_MISH_MAGIC, found: magic });
    }

    let count = read_u32_be(data, UDIF_MISH_CHUNK_COUNT_OFFSET) as usize;
    let mut chunks = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let c: raw::BlkxChunk = pod_at(data, UDIF_MISH_CHUNKS_OFFSET + i * mem::size_of::<raw::BlkxChunk>())
            .map_err(|_| Error::Manifest(format!("block table ends before chunk {i} of {count}")))?;
        chunks.push(Chunk {
            kind:              ChunkKind::from_raw(u32::from_be(c.entry_type)),
            comment:           u32::from_be(c.comment),
            sector:            u64::from_be(c.sector_number),
            sector_count:      u64::from_be(c.sector_count),
            compressed_offset: u64::from_be(c.compressed_offset),
            compressed_length: u64::from_be(c.compressed_length),
        });
    }

    Ok(BlockTable {
        sector_number: read_u64_be(data, UDIF_MISH_SECTOR_NUMBER_OFFSET),
        sector_count:  read_u64_be(data, UDIF_MISH_SECTOR_COUNT_OFFSET),
        data_offset:   read_u64_be(data, UDIF_MISH_DATA_OFFSET_OFFSET),
        chunks,
    })
}

/// True if `source` ends in a koly trailer.
pub fn has_koly_trailer<S: ByteSource + ?Sized>(source: &S) -> Result<bool> {
    let size = source.size()?;
    if size < UDIF_TRAILER_SIZE as u64 {
        return Ok(false);
    }
    let mut magic = [0u8; 4];
    let n = source.read_at(&mut magic, size - UDIF_TRAILER_SIZE as u64)?;
    Ok(n == magic.len() && u32::from_be_bytes(magic) == UDIF_KOLY_MAGIC)
}

pub struct DiskImage<S> {
    source:         S,
    pub trailer:    KolyTrailer,
    pub partitions: Vec<Partition>,
}

impl<S: ByteSource> DiskImage<S> {
    pub fn open(source: S) -> Result<Self> {
        let _span = tracy::span!("DiskImage::open");

        let size = source.size()?;
        if size < UDIF_TRAILER_SIZE as u64 {
            return Err(Error::NotADiskImage);
        }

        let mut trailer = vec![0u8; UDIF_TRAILER_SIZE];
        read_exact_at(&source, &mut trailer, size - UDIF_TRAILER_SIZE as u64)?;
        let trailer = parse_koly_trailer(&trailer)?;

        let xml_end = trailer.xml_offset.checked_add(trailer.xml_length);
        if trailer.xml_length == 0 || xml_end.map_or(true, |end| end > size) {
            return Err(Error::Manifest(format!(
                "manifest at {:#x}+{} lies outside the image", trailer.xml_offset, trailer.xml_length
            )));
        }

        let mut xml = vec![0u8; trailer.xml_length as usize];
        read_exact_at(&source, &mut xml, trailer.xml_offset)?;

        let mut partitions = Vec::new();
        for (index, BlkxEntry { name, data }) in plist::blkx_entries(&xml)?.into_iter().enumerate() {
            match parse_block_table(&data) {
                Ok(table) => partitions.push(Partition { index, name, table }),
                Err(e) => log::warn!("partition {index} ({name}): {e}"),
            }
        }

        log::debug!("disk image: {} partitions, {} sectors", partitions.len(), trailer.sector_count);
        Ok(Self { source, trailer, partitions })
    }

    /// First partition that holds an APFS container.
    #[inline]
    pub fn apfs_partition(&self) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.is_apfs())
    }

    /// Decompress `part` into `out` as a flat image, chunk by chunk at each
    /// chunk's sector offset.  Returns the image length in bytes.
    pub fn inflate_partition<W: Write + Seek>(&self, part: &Partition, out: &mut W) -> Result<u64> {
        let _span = tracy::span!("DiskImage::inflate_partition");

        let size = self.source.size()?;
        let base = self.trailer.data_fork_offset.checked_add(part.table.data_offset)
            .ok_or_else(|| Error::corrupt(format!("partition {} data offset overflows", part.index)))?;
        let zeros = vec![0u8; 64 * 1024];
        let mut end = 0u64;

        for chunk in &part.table.chunks {
            match chunk.kind {
                ChunkKind::Comment => continue,
                ChunkKind::Terminator => break,
                ChunkKind::Adc | ChunkKind::Bzip2 | ChunkKind::Lzfse | ChunkKind::Unknown(_) => {
                    return Err(Error::UnsupportedChunk { kind: chunk.kind.to_raw() });
                }
                _ => {}
            }

            let (Some(at), Some(want)) = (chunk.out_offset(), chunk.out_length()) else {
                return Err(Error::corrupt(format!(
                    "chunk at sector {} spans {} sectors past the addressable range", chunk.sector, chunk.sector_count
                )));
            };
            let Some(chunk_end) = at.checked_add(want) else {
                return Err(Error::corrupt(format!("chunk at sector {} ends past the addressable range", chunk.sector)));
            };
            out.seek(SeekFrom::Start(at))?;

            let written = match chunk.kind {
                ChunkKind::Zero | ChunkKind::Ignore => {
                    let mut left = want;
                    while left > 0 {
                        let n = left.min(zeros.len() as u64) as usize;
                        out.write_all(&zeros[..n])?;
                        left -= n as u64;
                    }
                    want
                }
                ChunkKind::Raw | ChunkKind::Zlib => {
                    // Sized by the image, so bound it by the image before allocating.
                    let start = base.checked_add(chunk.compressed_offset);
                    let fits = start
                        .and_then(|s| s.checked_add(chunk.compressed_length))
                        .is_some_and(|end| end <= size);
                    let (Some(start), true) = (start, fits) else {
                        return Err(Error::corrupt(format!(
                            "chunk at sector {}: {} compressed bytes at {:#x} lie outside the image",
                            chunk.sector, chunk.compressed_length, chunk.compressed_offset
                        )));
                    };

                    let mut compressed = vec![0u8; chunk.compressed_length as usize];
                    read_exact_at(&self.source, &mut compressed, start)?;

                    if chunk.kind == ChunkKind::Raw {
                        let n = want.min(compressed.len() as u64) as usize;
                        out.write_all(&compressed[..n])?;
                        n as u64
                    } else {
                        let mut decoder = ZlibDecoder::new(&compressed[..]).take(want);
                        io::copy(&mut decoder, out)?
                    }
                }
                _ => 0,
            };

            if written != want {
                return Err(Error::corrupt(format!(
                    "chunk at sector {} produced {written} of {want} bytes", chunk.sector
                )));
            }
            end = end.max(chunk_end);
        }

        out.flush()?;
        Ok(end)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use base64::Engine;
    use std::io::Cursor;

    pub fn mish(sector_count: u64, chunks: &[(u32, u64, u64, u64, u64)]) -> Vec<u8> {
        let mut t = vec![0u8; UDIF_MISH_CHUNKS_OFFSET];
        t[0..4].copy_from_slice(&UDIF_MISH_MAGIC.to_be_bytes());
        t[UDIF_MISH_SECTOR_COUNT_OFFSET..UDIF_MISH_SECTOR_COUNT_OFFSET + 8].copy_from_slice(&sector_count.to_be_bytes());
        t[UDIF_MISH_CHUNK_COUNT_OFFSET..UDIF_MISH_CHUNK_COUNT_OFFSET + 4].copy_from_slice(&(chunks.len() as u32).to_be_bytes());
        for &(kind, sector, count, off, len) in chunks {
            t.extend_from_slice(&kind.to_be_bytes());
            t.extend_from_slice(&0u32.to_be_bytes());
            t.extend_from_slice(&sector.to_be_bytes());
            t.extend_from_slice(&count.to_be_bytes());
            t.extend_from_slice(&off.to_be_bytes());
            t.extend_from_slice(&len.to_be_bytes());
        }
        t
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Wrap `partition` (a flat image) into a UDIF file: first sector raw,
    /// second zero, the rest zlib.
    pub fn build_dmg(partition: &[u8]) -> Vec<u8> {
        assert!(partition.len() % 512 == 0 && partition.len() >= 1024);
        let sectors = (partition.len() / 512) as u64;

        let mut data_fork = partition[..512].to_vec();
        let compressed = zlib(&partition[1024..]);
        let zoff = data_fork.len() as u64;
        data_fork.extend_from_slice(&compressed);

        let table = mish(sectors, &[
            (UDIF_CHUNK_COMMENT, 0, 0, 0, 0),
            (UDIF_CHUNK_RAW, 0, 1, 0, 512),
            (UDIF_CHUNK_ZERO, 1, 1, 0, 0),
            (UDIF_CHUNK_ZLIB, 2, sectors - 2, zoff, compressed.len() as u64),
            (UDIF_CHUNK_TERMINATOR, sectors, 0, 0, 0),
        ]);
        let b64 = base64::engine::general_purpose::STANDARD.encode(&table);

        let xml = format!(
            "<plist><dict><key>resource-fork</key><dict><key>blkx</key><array>\
             <dict><key>CFName</key><string>Driver Descriptor Map (DDM : 0)</string>\
             <key>Data</key><data>{}</data></dict>\
             <dict><key>CFName</key><string>disk image (Apple_APFS : 1)</string>\
             <key>Data</key><data>\n{}\n</data></dict>\
             </array></dict></dict></plist>",
            base64::engine::general_purpose::STANDARD.encode(mish(0, &[])),
            b64,
        );

        let mut file = data_fork.clone();
        let xml_offset = file.len() as u64;
        file.extend_from_slice(xml.as_bytes());

        let mut koly = vec![0u8; UDIF_TRAILER_SIZE];
        koly[0..4].copy_from_slice(&UDIF_KOLY_MAGIC.to_be_bytes());
        koly[4..8].copy_from_slice(&4u32.to_be_bytes());
        koly[8..12].copy_from_slice(&512u32.to_be_bytes());
        koly[UDIF_KOLY_DATA_FORK_LEN_OFFSET..UDIF_KOLY_DATA_FORK_LEN_OFFSET + 8].copy_from_slice(&(data_fork.len() as u64).to_be_bytes());
        koly[UDIF_KOLY_XML_OFFSET..UDIF_KOLY_XML_OFFSET + 8].copy_from_slice(&xml_offset.to_be_bytes());
        koly[UDIF_KOLY_XML_LEN_OFFSET..UDIF_KOLY_XML_LEN_OFFSET + 8].copy_from_slice(&(xml.len() as u64).to_be_bytes());
        koly[UDIF_KOLY_SECTOR_COUNT_OFFSET..UDIF_KOLY_SECTOR_COUNT_OFFSET + 8].copy_from_slice(&sectors.to_be_bytes());
        file.extend_from_slice(&koly);
        file
    }

    fn partition_bytes() -> Vec<u8> {
        let mut p: Vec<u8> = (0..8 * 512).map(|i| (i % 253) as u8).collect();
        p[512..1024].fill(0);
        p
    }

    #[test]
    fn test_open_lists_partitions() {
        let dmg = DiskImage::open(build_dmg(&partition_bytes())).unwrap();

        assert_eq!(dmg.trailer.sector_count, 8);
        assert_eq!(dmg.partitions.len(), 2);
        assert_eq!(dmg.partitions[0].table.chunks.len(), 0);

        let apfs = dmg.apfs_partition().unwrap();
        assert_eq!(apfs.index, 1);
        assert_eq!(apfs.table.chunks.len(), 5);
        assert_eq!(apfs.table.chunks[3].kind, ChunkKind::Zlib);
    }

    #[test]
    fn test_inflate_reproduces_partition() {
        let original = partition_bytes();
        let dmg = DiskImage::open(build_dmg(&original)).unwrap();
        let part = dmg.apfs_partition().unwrap().clone();

        let mut out = Cursor::new(Vec::new());
        let len = dmg.inflate_partition(&part, &mut out).unwrap();

        assert_eq!(len, original.len() as u64);
        assert_eq!(out.into_inner(), original);
    }

    #[test]
    fn test_unsupported_chunk_aborts() {
        let mut dmg = DiskImage::open(build_dmg(&partition_bytes())).unwrap();
        dmg.partitions[1].table.chunks[3].kind = ChunkKind::Lzfse;
        let part = dmg.partitions[1].clone();

        let err = dmg.inflate_partition(&part, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChunk { kind: UDIF_CHUNK_LZFSE }));
    }

    #[test]
    fn test_chunk_past_image_end_is_rejected_before_allocating() {
        let mut dmg = DiskImage::open(build_dmg(&partition_bytes())).unwrap();
        dmg.partitions[1].table.chunks[3].compressed_length = u64::MAX / 2;
        let part = dmg.partitions[1].clone();

        let err = dmg.inflate_partition(&part, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));

        dmg.partitions[1].table.chunks[3].compressed_length = 16;
        dmg.partitions[1].table.chunks[3].compressed_offset = u64::MAX - 8;
        let part = dmg.partitions[1].clone();
        assert!(matches!(dmg.inflate_partition(&part, &mut Cursor::new(Vec::new())), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_sector_overflow_is_rejected() {
        let mut dmg = DiskImage::open(build_dmg(&partition_bytes())).unwrap();
        dmg.partitions[1].table.chunks[2].sector = u64::MAX / 4;
        let part = dmg.partitions[1].clone();

        let err = dmg.inflate_partition(&part, &mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_manifest_range_overflow_is_rejected() {
        let mut file = build_dmg(&partition_bytes());
        let koly = file.len() - UDIF_TRAILER_SIZE;
        let at = koly + UDIF_KOLY_XML_OFFSET;
        file[at..at + 8].copy_from_slice(&(u64::MAX - 4).to_be_bytes());

        assert!(matches!(DiskImage::open(file), Err(Error::Manifest(_))));
    }

    #[test]
    fn test_trailer_detection() {
        assert!(has_koly_trailer(&build_dmg(&partition_bytes())).unwrap());
        assert!(!has_koly_trailer(&vec![0u8; 4096]).unwrap());
        assert!(matches!(DiskImage::open(vec![0u8; 4096]), Err(Error::NotADiskImage)));
    }

    #[test]
    fn test_block_table_rejects_bad_magic() {
        let mut t = mish(1, &[]);
        t[0] = b'x';
        assert!(matches!(parse_block_table(&t), Err(Error::BadMagic { .. })));
        assert!(matches!(parse_block_table(&t[..10]), Err(Error::Manifest(_))));
    }
}
