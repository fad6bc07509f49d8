//! Deployment artifact container (DFQ1).
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! magic        4 bytes  "DFQ1"
//! version      u32
//! image_size   u32
//! num_classes  u32, then per class: u32 length + UTF-8 name
//! quantized    u32, then per quantized parameter: u32 length + UTF-8 name
//! record_len   u64
//! record       Burn binary record of the quantized model
//! ```

use std::fs;
use std::path::Path;

use burn::{
    module::Module,
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
};

use crate::config::PipelineConfig;
use crate::model::{LesionClassifier, LesionClassifierRecord};
use crate::utils::error::{PipelineError, Result, ResultExt};

pub const DFQ_MAGIC: [u8; 4] = *b"DFQ1";
pub const DFQ_VERSION: u32 = 1;

type RecordCodec = BinBytesRecorder<FullPrecisionSettings>;

/// Quantized model ready for deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub image_size: u32,
    pub class_names: Vec<String>,
    /// Parameters stored as int8
    pub quantized: Vec<String>,
    /// Serialized module record
    pub record: Vec<u8>,
}

impl Artifact {
    /// Package a quantized model
    pub fn from_model<B: Backend>(
        model: LesionClassifier<B>,
        quantized: Vec<String>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let image_size = u32::try_from(config.data.image_size)
            .map_err(|_| PipelineError::Export("image size does not fit in u32".to_string()))?;
        let record = RecordCodec::default()
            .record(model.into_record(), ())
            .export("failed to serialize quantized record")?;

        Ok(Self {
            image_size,
            class_names: config.data.class_names.clone(),
            quantized,
            record,
        })
    }

    /// Decode the record into a model skeleton built from `config`
    pub fn load_model<B: Backend>(&self, config: &PipelineConfig, device: &B::Device) -> Result<LesionClassifier<B>> {
        if self.class_names != config.data.class_names {
            return Err(PipelineError::Export(
                "artifact class list does not match the configuration".to_string(),
            ));
        }
        let record: LesionClassifierRecord<B> = RecordCodec::default()
            .load(self.record.clone(), device)
            .export("failed to decode quantized record")?;
        Ok(LesionClassifier::new(config, device).load_record(record))
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.record.len() + 64);

        bytes.extend_from_slice(&DFQ_MAGIC);
        bytes.extend_from_slice(&DFQ_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.image_size.to_le_bytes());

        put_u32(&mut bytes, self.class_names.len())?;
        for name in &self.class_names {
            put_str(&mut bytes, name)?;
        }
        put_u32(&mut bytes, self.quantized.len())?;
        for name in &self.quantized {
            put_str(&mut bytes, name)?;
        }

        bytes.extend_from_slice(&(self.record.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&self.record);

        Ok(bytes)
    }

    /// Deserialize from bytes.
    ///
    /// Counts and lengths come from untrusted input; each is checked against the bytes
    /// actually remaining before anything is allocated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        if reader.take(4)? != DFQ_MAGIC {
            return Err(PipelineError::Export("invalid magic bytes".to_string()));
        }
        let version = reader.u32()?;
        if version != DFQ_VERSION {
            return Err(PipelineError::Export(format!(
                "unsupported artifact version: {}",
                version
            )));
        }

        let image_size = reader.u32()?;
        let class_names = reader.strings()?;
        let quantized = reader.strings()?;

        let record_len = usize::try_from(reader.u64()?)
            .map_err(|_| PipelineError::Export("record length does not fit in memory".to_string()))?;
        let record = reader.take(record_len)?.to_vec();

        if !reader.is_exhausted() {
            return Err(PipelineError::Export("trailing bytes after the record".to_string()));
        }

        Ok(Self {
            image_size,
            class_names,
            quantized,
            record,
        })
    }

    /// Write the artifact, returning its size in bytes
    pub fn write(&self, path: &Path) -> Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = self.to_bytes()?;
        fs::write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }
}

fn put_u32(bytes: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| PipelineError::Export(format!("value {} does not fit in u32", value)))?;
    bytes.extend_from_slice(&value.to_le_bytes());
    Ok(())
}

fn put_str(bytes: &mut Vec<u8>, s: &str) -> Result<()> {
    put_u32(bytes, s.len())?;
    bytes.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked cursor over artifact bytes
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| PipelineError::Export("artifact truncated".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| PipelineError::Export(format!("invalid UTF-8 in artifact: {}", e)))
    }

    /// A u32 count followed by that many strings
    fn strings(&mut self) -> Result<Vec<String>> {
        let count = self.u32()? as usize;
        // every string needs at least its 4-byte length prefix
        let max_count = self.remaining() / 4;
        if count > max_count {
            return Err(PipelineError::Export(format!(
                "artifact claims {} strings but only {} bytes remain",
                count,
                self.remaining()
            )));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}
