//! Offline tool that rewrites every Cluster's Timestamp element in an MKV
//! file so the first cluster begins at a caller-supplied timestamp,
//! shifting every later cluster by the same delta.
//!
//! Grounded on `samples/mkv_uploader/mkv_update_time.c` of the reference
//! producer: the same streaming element walk (Segment/Cluster headers are
//! rewritten to the unknown-size form, every other element is copied
//! through verbatim) using this crate's [`kvs_producer::mkv`] element
//! parser instead of the sample app's `FileInputStream`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use kvs_producer::mkv::{read_element_id, read_element_size, ELEMENT_SIZE_UNKNOWN};

const ELEMENT_ID_SEGMENT: u32 = 0x1853_8067;
const ELEMENT_ID_INFO: u32 = 0x1549_A966;
const ELEMENT_ID_TIMESTAMP_SCALE: u32 = 0x2A_D7B1;
const ELEMENT_ID_CLUSTER: u32 = 0x1F43_B675;
const ELEMENT_ID_TIMESTAMP: u32 = 0xE7;

const SEGMENT_HEADER_UNKNOWN_SIZE: [u8; 5] = [0x18, 0x53, 0x80, 0x67, 0xFF];
const CLUSTER_HEADER_UNKNOWN_SIZE: [u8; 5] = [0x1F, 0x43, 0xB6, 0x75, 0xFF];

#[derive(Parser)]
#[command(about = "Rewrite MKV cluster timestamps relative to a new begin timestamp")]
struct Args {
    /// Source MKV file.
    #[arg(short, long)]
    infile: PathBuf,

    /// Destination MKV file.
    #[arg(short, long)]
    outfile: PathBuf,

    /// New begin timestamp: an absolute millisecond value, or a negative
    /// number of milliseconds before the current wall-clock time.
    #[arg(short, long, allow_hyphen_values = true)]
    time_ms: i64,
}

/// Resolves the `-t` argument the way `convertTimestampMs` does: a negative
/// value is `N` milliseconds before now, a non-negative value is absolute.
fn convert_timestamp_ms(time_ms: i64) -> u64 {
    if time_ms >= 0 {
        return time_ms as u64;
    }
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    now_ms.saturating_sub((-time_ms) as u64)
}

/// Grows `buf` by reading more of the file until it holds at least
/// `need` bytes or EOF is hit.
fn fill_until<R: Read>(reader: &mut R, buf: &mut Vec<u8>, need: usize) -> Result<bool> {
    let mut chunk = [0u8; 4096];
    while buf.len() < need {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(buf.len() >= need);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(true)
}

fn pack_be(buf: &[u8]) -> u64 {
    buf.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn unpack_be(dst: &mut [u8], mut val: u64) {
    for b in dst.iter_mut().rev() {
        *b = (val & 0xFF) as u8;
        val >>= 8;
    }
}

fn retimestamp(infile: &PathBuf, outfile: &PathBuf, begin_ms: u64) -> Result<()> {
    let mut reader = BufReader::new(File::open(infile).with_context(|| format!("opening {infile:?}"))?);
    let mut writer = BufWriter::new(File::create(outfile).with_context(|| format!("creating {outfile:?}"))?);

    let mut buf: Vec<u8> = Vec::new();
    let mut timestamp_scale_ms: u64 = 1;

    loop {
        if !fill_until(&mut reader, &mut buf, 1)? {
            break;
        }

        let id_len = kvs_producer::mkv::element_id_len(buf[0])?;
        fill_until(&mut reader, &mut buf, id_len)?;
        let (id, id_len) = read_element_id(&buf)?;

        fill_until(&mut reader, &mut buf, id_len + 1)?;
        let size_len = kvs_producer::mkv::element_size_len(buf[id_len])?;
        fill_until(&mut reader, &mut buf, id_len + size_len)?;
        let (size, size_len) = read_element_size(&buf[id_len..])?;

        let header_len = id_len + size_len;
        let is_unknown_size = size == ELEMENT_SIZE_UNKNOWN;
        if !is_unknown_size {
            fill_until(&mut reader, &mut buf, header_len + size as usize)?;
        }

        match id {
            ELEMENT_ID_SEGMENT => {
                writer.write_all(&SEGMENT_HEADER_UNKNOWN_SIZE)?;
                buf.drain(..header_len);
            }
            ELEMENT_ID_CLUSTER => {
                writer.write_all(&CLUSTER_HEADER_UNKNOWN_SIZE)?;
                buf.drain(..header_len);
            }
            ELEMENT_ID_INFO => {
                writer.write_all(&buf[..header_len])?;
                buf.drain(..header_len);
            }
            ELEMENT_ID_TIMESTAMP_SCALE => {
                let total = header_len + size as usize;
                timestamp_scale_ms = pack_be(&buf[header_len..total]) / 1_000_000;
                if timestamp_scale_ms == 0 {
                    timestamp_scale_ms = 1;
                }
                writer.write_all(&buf[..total])?;
                buf.drain(..total);
            }
            ELEMENT_ID_TIMESTAMP => {
                let total = header_len + size as usize;
                let raw_ms = pack_be(&buf[header_len..total]) * timestamp_scale_ms;
                let new_scaled = (raw_ms + begin_ms) / timestamp_scale_ms;
                let mut out = [0x00u8; 10];
                out[0] = 0xE7;
                out[1] = 0x88;
                unpack_be(&mut out[2..10], new_scaled);
                writer.write_all(&out)?;
                buf.drain(..total);
            }
            _ if is_unknown_size => {
                // Master element (Segment/Cluster already handled above);
                // any other unknown-size element is passed through as just
                // its header and descended into on the next iteration.
                writer.write_all(&buf[..header_len])?;
                buf.drain(..header_len);
            }
            _ => {
                let total = header_len + size as usize;
                writer.write_all(&buf[..total])?;
                buf.drain(..total);
            }
        }
    }

    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.infile.exists() {
        bail!("input file {:?} does not exist", args.infile);
    }
    let begin_ms = convert_timestamp_ms(args.time_ms);
    retimestamp(&args.infile, &args.outfile, begin_ms)?;
    println!("wrote {:?} with begin timestamp {} ms", args.outfile, begin_ms);
    Ok(())
}
