//! Safetensors containers for recordings and epoch sets.
//!
//! Layout: 8-byte little-endian header length, JSON header, raw
//! little-endian tensor bytes. Tensors are F64:
//!
//! | tensor            | shape     | file kind         |
//! |-------------------|-----------|-------------------|
//! | `data`            | [C, T]    | recording         |
//! | `data`            | [E, C, T] | epochs            |
//! | `chan_pos`        | [C, 3]    | both (NaN = none) |
//! | `times`           | [T]       | epochs            |
//! | `event_latencies` | [E]       | epochs            |
//! | `ica_unmixing`    | [K, C]    | recording, opt.   |
//! | `ica_mixing`      | [C, K]    | recording, opt.   |
//! | `ica_means`       | [C]       | recording, opt.   |
//!
//! Everything else (labels, sampling rate, events, processing log, subject
//! metadata, …) is JSON text in the header's `__metadata__` map.
//!
//! Writes go to a hidden sibling file that is renamed into place, so a
//! failed write never leaves a truncated container behind.
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::epochs::{EpochSet, RejectionSummary};
use crate::error::{PipelineError, Result};
use crate::ica::{ComponentLabels, IcaSolution};
use crate::recording::{Channel, Event, Recording, RecordingMeta, TrialType};

const META_KEY: &str = "__metadata__";

// ── Reader ────────────────────────────────────────────────────────────────────

struct Container {
    bytes: Vec<u8>,
    data_start: usize,
    tensors: HashMap<String, serde_json::Value>,
    meta: HashMap<String, String>,
}

fn format_err(msg: impl Into<String>) -> PipelineError {
    PipelineError::Format(msg.into())
}

impl Container {
    fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 8 {
            return Err(format_err(format!("{}: file too small", path.display())));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        let header_end = 8usize
            .checked_add(n)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| format_err(format!("{}: header length {n} out of range", path.display())))?;

        let mut tensors: HashMap<String, serde_json::Value> = serde_json::from_slice(&bytes[8..header_end])?;
        let meta = match tensors.remove(META_KEY) {
            Some(m) => serde_json::from_value(m)?,
            None => HashMap::new(),
        };
        Ok(Self { bytes, data_start: header_end, tensors, meta })
    }

    fn has(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    fn f64_tensor(&self, name: &str) -> Result<(Vec<f64>, Vec<usize>)> {
        let entry = self
            .tensors
            .get(name)
            .ok_or_else(|| format_err(format!("missing tensor '{name}'")))?;
        if entry["dtype"].as_str() != Some("F64") {
            return Err(format_err(format!("tensor '{name}' is not F64")));
        }
        let shape: Vec<usize> = entry["shape"]
            .as_array()
            .ok_or_else(|| format_err(format!("tensor '{name}' has no shape")))?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize))
            .collect::<Option<_>>()
            .ok_or_else(|| format_err(format!("tensor '{name}' has a bad shape")))?;
        let offsets: Vec<usize> = entry["data_offsets"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_u64().map(|o| o as usize)).collect())
            .unwrap_or_default();
        let [s, e] = offsets[..] else {
            return Err(format_err(format!("tensor '{name}' has bad offsets")));
        };
        let (s, e) = (self.data_start + s, self.data_start + e);
        let expected = shape.iter().product::<usize>() * 8;
        if s > e || e > self.bytes.len() || e - s != expected {
            return Err(format_err(format!("tensor '{name}' byte range does not match its shape")));
        }
        let values = self.bytes[s..e]
            .chunks_exact(8)
            .map(|b| {
                let mut v = [0u8; 8];
                v.copy_from_slice(b);
                f64::from_le_bytes(v)
            })
            .collect();
        Ok((values, shape))
    }

    fn array1(&self, name: &str) -> Result<Array1<f64>> {
        let (v, _) = self.f64_tensor(name)?;
        Ok(Array1::from_vec(v))
    }

    fn array2(&self, name: &str) -> Result<Array2<f64>> {
        let (v, shape) = self.f64_tensor(name)?;
        match shape[..] {
            [a, b] => Array2::from_shape_vec((a, b), v).map_err(|e| format_err(e.to_string())),
            _ => Err(format_err(format!("tensor '{name}' is not 2-D"))),
        }
    }

    fn array3(&self, name: &str) -> Result<Array3<f64>> {
        let (v, shape) = self.f64_tensor(name)?;
        match shape[..] {
            [a, b, c] => Array3::from_shape_vec((a, b, c), v).map_err(|e| format_err(e.to_string())),
            _ => Err(format_err(format!("tensor '{name}' is not 3-D"))),
        }
    }

    fn meta<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let text = self
            .meta
            .get(key)
            .ok_or_else(|| format_err(format!("missing metadata '{key}'")))?;
        Ok(serde_json::from_str(text)?)
    }

    fn meta_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.meta.get(key) {
            Some(text) => Ok(serde_json::from_str(text)?),
            None => Ok(T::default()),
        }
    }

    fn expect_kind(&self, kind: &str) -> Result<()> {
        let found: String = self.meta(KIND)?;
        if found != kind {
            return Err(format_err(format!("expected a {kind} container, found {found}")));
        }
        Ok(())
    }

    /// Channel descriptors from `channels` + optional `chan_pos`.
    fn channels(&self) -> Result<Vec<Channel>> {
        let labels: Vec<String> = self.meta("channels")?;
        if !self.has("chan_pos") {
            return Ok(labels.into_iter().map(Channel::new).collect());
        }
        let pos = self.array2("chan_pos")?;
        if pos.dim() != (labels.len(), 3) {
            return Err(format_err("chan_pos does not match the channel labels"));
        }
        Ok(labels
            .into_iter()
            .zip(pos.rows())
            .map(|(label, p)| {
                if p.iter().all(|v| v.is_finite()) {
                    Channel::with_pos(label, [p[0], p[1], p[2]])
                } else {
                    Channel::new(label)
                }
            })
            .collect())
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

const KIND: &str = "kind";

/// Safetensors writer for F64 tensors plus a `__metadata__` map.
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, Vec<usize>)>,
    meta: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, shape.to_vec()));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_f64_arr3(&mut self, name: &str, arr: &Array3<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, arr.shape());
    }

    /// Store `value` as JSON text under `key` in `__metadata__`.
    pub fn set_meta<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        self.meta.insert(key.to_string(), serde_json::to_string(value)?);
        Ok(())
    }

    /// Write to `path` through a temporary sibling and rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut header = serde_json::Map::new();
        if !self.meta.is_empty() {
            header.insert(META_KEY.into(), serde_json::to_value(&self.meta)?);
        }
        let mut offset = 0usize;
        for (name, data, shape) in &self.entries {
            header.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": "F64",
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let mut hdr = serde_json::to_vec(&header)?;
        let pad = (8 - hdr.len() % 8) % 8;
        hdr.extend(std::iter::repeat(b' ').take(pad));

        let tmp = temp_sibling(path);
        let result = (|| -> Result<()> {
            let mut f = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            f.write_all(&(hdr.len() as u64).to_le_bytes())?;
            f.write_all(&hdr)?;
            for (_, data, _) in &self.entries {
                f.write_all(data)?;
            }
            f.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn add_channels(w: &mut StWriter, channels: &[Channel]) -> Result<()> {
    let labels: Vec<&str> = channels.iter().map(|c| c.label.as_str()).collect();
    w.set_meta("channels", &labels)?;
    if channels.iter().any(|c| c.pos.is_some()) {
        let pos: Vec<f64> = channels
            .iter()
            .flat_map(|c| c.pos.unwrap_or([f64::NAN; 3]))
            .collect();
        w.add_f64("chan_pos", &pos, &[channels.len(), 3]);
    }
    Ok(())
}

// ── Recordings ────────────────────────────────────────────────────────────────

/// Save a continuous recording, including any attached decomposition.
pub fn save_recording(rec: &Recording, path: &Path) -> Result<()> {
    rec.check()?;
    let mut w = StWriter::new();
    w.set_meta(KIND, "recording")?;
    w.add_f64_arr2("data", &rec.data);
    add_channels(&mut w, &rec.channels)?;
    w.set_meta("sfreq", &rec.sfreq)?;
    w.set_meta("events", &rec.events)?;
    w.set_meta("log", &rec.log)?;
    w.set_meta("removed_channels", &rec.removed_channels)?;
    w.set_meta("removed_components", &rec.removed_components)?;
    w.set_meta("meta", &rec.meta)?;
    if let Some(ica) = &rec.ica {
        w.add_f64_arr2("ica_unmixing", &ica.unmixing);
        w.add_f64_arr2("ica_mixing", &ica.mixing);
        w.add_f64("ica_means", &ica.means.to_vec(), &[ica.means.len()]);
        w.set_meta("ica_steps", &ica.steps)?;
        w.set_meta("ica_converged", &ica.converged)?;
        w.set_meta("ica_labels", &ica.labels)?;
    }
    w.write(path)
}

/// Load a continuous recording.
pub fn load_recording(path: &Path) -> Result<Recording> {
    let c = Container::open(path)?;
    c.expect_kind("recording")?;
    let mut rec = Recording::new(c.channels()?, c.array2("data")?, c.meta("sfreq")?)?;
    rec.events = c.meta_or_default::<Vec<Event>>("events")?;
    rec.log = c.meta_or_default("log")?;
    rec.removed_channels = c.meta_or_default("removed_channels")?;
    rec.removed_components = c.meta_or_default("removed_components")?;
    rec.meta = c.meta_or_default::<RecordingMeta>("meta")?;
    if c.has("ica_unmixing") {
        let labels: Option<Vec<ComponentLabels>> = c.meta_or_default("ica_labels")?;
        rec.ica = Some(IcaSolution {
            unmixing: c.array2("ica_unmixing")?,
            mixing: c.array2("ica_mixing")?,
            means: c.array1("ica_means")?,
            steps: c.meta_or_default("ica_steps")?,
            converged: c.meta_or_default("ica_converged")?,
            labels,
        });
    }
    Ok(rec)
}

// ── Epoch sets ────────────────────────────────────────────────────────────────

/// Save the accepted epochs of one trial type.
pub fn save_epochs(set: &EpochSet, path: &Path) -> Result<()> {
    set.check()?;
    let mut w = StWriter::new();
    w.set_meta(KIND, "epochs")?;
    w.add_f64_arr3("data", &set.data);
    add_channels(&mut w, &set.channels)?;
    w.add_f64("times", &set.times, &[set.times.len()]);
    w.add_f64("event_latencies", &set.event_latencies, &[set.event_latencies.len()]);
    w.set_meta("sfreq", &set.sfreq)?;
    w.set_meta("trial_type", &set.trial_type)?;
    w.set_meta("reaction_times", &set.reaction_times)?;
    w.set_meta("log", &set.log)?;
    w.set_meta("removed_channels", &set.removed_channels)?;
    w.set_meta("removed_components", &set.removed_components)?;
    w.set_meta("rejected", &set.rejected)?;
    w.set_meta("meta", &set.meta)?;
    w.write(path)
}

/// Load an epoch set written by [`save_epochs`].
pub fn load_epochs(path: &Path) -> Result<EpochSet> {
    let c = Container::open(path)?;
    c.expect_kind("epochs")?;
    let set = EpochSet {
        channels: c.channels()?,
        data: c.array3("data")?,
        sfreq: c.meta("sfreq")?,
        times: c.array1("times")?.to_vec(),
        trial_type: c.meta::<TrialType>("trial_type")?,
        meta: c.meta_or_default("meta")?,
        log: c.meta_or_default("log")?,
        removed_channels: c.meta_or_default("removed_channels")?,
        removed_components: c.meta_or_default("removed_components")?,
        event_latencies: c.array1("event_latencies")?.to_vec(),
        reaction_times: c.meta_or_default("reaction_times")?,
        rejected: c.meta_or_default::<RejectionSummary>("rejected")?,
    };
    set.check()?;
    Ok(set)
}
