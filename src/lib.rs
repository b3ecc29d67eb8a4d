// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

//! Collect files from a raw NTFS volume by walking its Master File Table,
//! without going through the filesystem driver.

use crossbeam_channel::{Sender, bounded};
use log::{debug, info, trace, warn};
use prettytable::{Table, row};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::thread;

pub mod attributes;
pub mod error;
pub mod mft;
pub mod output;
pub mod pbs;
pub mod runs;
pub mod search;
pub mod stream;
pub mod tree;
pub mod volume;

#[cfg(test)]
mod fixtures;

use attributes::{AttributeList, AttributeListEntry, DataAttribute, decode_attribute_list};
use error::{CollectError, Result};
use mft::{AttributeType, MFT_RECORD_NUMBER, MftRecord, is_directory_record};
use output::{ArtifactSink, ChannelReader, normalize_output_path};
use pbs::{PartitionBootSector, VolumeGeometry};
use runs::DataRun;
use search::{ConfirmedFile, PossibleMatch, SearchTerm, confirm_matches, match_file_name};
use stream::ExtentReader;
use tree::{
    DirectoryCollector, DirectoryTree, ORPHAN_PREFIX, UnresolvedDirectory, join, volume_root,
};
use volume::{VolumeProvider, VolumeSource};

const DATA_TYPE_CODE: u32 = AttributeType::Data as u32;

/// Everything a scan needs to know up front.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Drive letter the volume is known by, e.g. `"C"`.
    pub volume: String,
    pub terms: Vec<SearchTerm>,
    /// Records buffered between the scan and the $MFT writer.
    pub mft_channel_capacity: usize,
    /// Try the host filesystem first when extracting.
    pub prefer_os_reads: bool,
}

impl ScanConfig {
    pub fn new(volume: &str, terms: Vec<SearchTerm>) -> Self {
        Self {
            volume: volume.to_string(),
            terms,
            mft_channel_capacity: 64,
            prefer_os_reads: false,
        }
    }
}

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub records_visited: u64,
    pub records_skipped: u64,
    pub records_deleted: u64,
    pub directories: u64,
    pub possible_matches: u64,
    pub attribute_lists_resolved: u64,
    pub confirmed: u64,
    pub extracted: u64,
    pub failed: u64,
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.add_row(row!["Scan Report"]);
        table.add_row(row![b -> "Records visited", self.records_visited]);
        table.add_row(row![b -> "Records skipped", self.records_skipped]);
        table.add_row(row![b -> "Deleted records", self.records_deleted]);
        table.add_row(row![b -> "Directories", self.directories]);
        table.add_row(row![b -> "Possible matches", self.possible_matches]);
        table.add_row(row![b -> "Attribute lists resolved", self.attribute_lists_resolved]);
        table.add_row(row![b -> "Confirmed", self.confirmed]);
        table.add_row(row![b -> "Extracted", self.extracted]);
        table.add_row(row![b -> "Failed", self.failed]);
        write!(f, "{}", table)
    }
}

/// What a scan found.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub confirmed: Vec<ConfirmedFile>,
    pub tree: DirectoryTree,
}

/// State built up during the forward pass over the MFT.
#[derive(Default)]
struct ScanState {
    report: ScanReport,
    directories: DirectoryCollector,
    possible: Vec<PossibleMatch>,
    record_offsets: HashMap<u64, u64>,
}

/// Where an extension record can be read from.
enum RecordLocation<'a> {
    /// Byte offset noted during the scan.
    Offset(u64),
    /// Not noted; walk these $MFT extents instead.
    Extents(&'a [DataRun]),
}

/// Drives a scan over one volume.
pub struct Collector<P: VolumeProvider> {
    pub pbs: PartitionBootSector,
    provider: P,
    config: ScanConfig,
    geometry: VolumeGeometry,
    mft_runs: Vec<DataRun>,
    mft_size: u64,
}

impl<P: VolumeProvider> Collector<P> {
    /// Parse the boot sector and locate every extent of the $MFT.
    ///
    /// Any failure here is fatal: without record 0 there is nothing to scan.
    pub fn new(provider: P, config: ScanConfig) -> Result<Self> {
        let sector = provider.read_boot_sector()?;
        let pbs = PartitionBootSector::from_bytes(&sector)?;
        let geometry = pbs.geometry()?;
        info!(
            "NTFS volume {}: {} byte clusters, {} byte records, $MFT at 0x{:X}",
            volume_root(&config.volume),
            geometry.bytes_per_cluster,
            geometry.mft_record_size,
            geometry.mft_byte_offset
        );

        let mut collector = Self {
            pbs,
            provider,
            config,
            geometry,
            mft_runs: Vec::new(),
            mft_size: 0,
        };
        collector.load_mft_runs()?;
        Ok(collector)
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn mft_runs(&self) -> &[DataRun] {
        &self.mft_runs
    }

    pub fn mft_size(&self) -> u64 {
        self.mft_size
    }

    pub fn record_count(&self) -> u64 {
        self.mft_size / self.geometry.mft_record_size as u64
    }

    /// Decode record 0 and gather the runs of its $DATA, including fragments
    /// held by extension records.
    fn load_mft_runs(&mut self) -> Result<()> {
        let bpc = self.geometry.bytes_per_cluster;
        let record_size = self.geometry.mft_record_size as usize;
        let mut source = self.provider.open()?;

        let mut buf = vec![0u8; record_size];
        source.read_exact_at(self.geometry.mft_byte_offset, &mut buf)?;
        let record0 = MftRecord::from_bytes(&buf, self.geometry.mft_byte_offset)?;

        let base = record0
            .data(bpc)
            .ok_or(CollectError::MissingMftData)??;
        let mut fragments = vec![base];

        if let Some(list) = record0.attribute_list(bpc) {
            let entries = self.read_attribute_list(list?)?;
            // extension records can only be found in extents already known
            for entry in data_entries(&entries, MFT_RECORD_NUMBER) {
                let known = sorted_runs(&fragments);
                let fragment = self.load_fragment(
                    &mut source,
                    RecordLocation::Extents(&known),
                    MFT_RECORD_NUMBER,
                    entry,
                )?;
                if let Some(fragment) = fragment {
                    fragments.push(fragment);
                }
            }
        }

        self.mft_size = fragments
            .iter()
            .find_map(DataAttribute::size)
            .ok_or(CollectError::MissingMftData)?;
        self.mft_runs = sorted_runs(&fragments);
        if self.mft_runs.is_empty() {
            return Err(CollectError::MissingMftData);
        }
        debug!(
            "$MFT: {} bytes in {} extents",
            self.mft_size,
            self.mft_runs.len()
        );
        Ok(())
    }

    /// Scan and confirm without extracting anything.
    pub fn locate(&self) -> Result<ScanOutcome> {
        self.search(None)
    }

    /// Scan, confirm and hand every confirmed file to `sink`.
    ///
    /// When $MFT itself is a target its bytes are copied to the sink while the
    /// scan reads them. The scan blocks whenever the writer falls behind.
    pub fn collect(&self, sink: &mut dyn ArtifactSink) -> Result<ScanOutcome> {
        let mft_path = join(&volume_root(&self.config.volume), "$MFT");
        let mft_targeted = self
            .config
            .terms
            .iter()
            .any(|t| t.matches_name("$MFT") && t.matches_path(&mft_path));

        let (mut outcome, teed) = if mft_targeted {
            let mft_name = normalize_output_path(&mft_path);
            let writer_sink = &mut *sink;
            let (outcome, written) = thread::scope(|scope| {
                let (tx, rx) = bounded::<Vec<u8>>(self.config.mft_channel_capacity.max(1));
                let name = mft_name.clone();
                let writer = scope.spawn(move || {
                    let mut reader = ChannelReader::new(rx);
                    writer_sink.write_artifact(&name, &mut reader)
                });
                let outcome = self.search(Some(tx));
                let written = writer.join().unwrap_or_else(|_| {
                    Err(CollectError::Sink(mft_name.clone(), "writer thread panicked".into()))
                });
                (outcome, written)
            });
            let mut outcome = outcome?;
            let teed = match written {
                Ok(n) => {
                    info!("Copied $MFT ({} bytes) alongside the scan", n);
                    outcome.report.extracted += 1;
                    true
                }
                Err(e) => {
                    warn!("$MFT copy failed, extracting it afterwards instead: {}", e);
                    false
                }
            };
            (outcome, teed)
        } else {
            (self.search(None)?, false)
        };

        for file in &outcome.confirmed {
            if teed && file.record_number == MFT_RECORD_NUMBER {
                continue;
            }
            match self.extract(file, sink) {
                Ok(n) => {
                    debug!("Extracted '{}' ({} bytes)", file.full_path, n);
                    outcome.report.extracted += 1;
                }
                Err(e) => {
                    warn!("Could not extract '{}': {}", file.full_path, e);
                    outcome.report.failed += 1;
                }
            }
        }
        info!(
            "Extracted {} files, {} failed",
            outcome.report.extracted, outcome.report.failed
        );
        Ok(outcome)
    }

    fn search(&self, tee: Option<Sender<Vec<u8>>>) -> Result<ScanOutcome> {
        let mut state = self.scan_records(tee)?;
        self.resolve_attribute_lists(&mut state)?;

        let tree = state.directories.resolve(&self.config.volume);
        let confirmed = confirm_matches(&self.config.terms, state.possible, &tree);
        state.report.confirmed = confirmed.len() as u64;

        Ok(ScanOutcome {
            report: state.report,
            confirmed,
            tree,
        })
    }

    /// One sequential pass over the whole $MFT.
    fn scan_records(&self, mut tee: Option<Sender<Vec<u8>>>) -> Result<ScanState> {
        let record_size = self.geometry.mft_record_size as usize;
        let source = self.provider.open()?;
        let mut reader = ExtentReader::new(source, self.mft_runs.clone(), Some(self.mft_size));
        let mut state = ScanState::default();
        let mut buf = vec![0u8; record_size];
        let mut index: u64 = 0;

        info!("Scanning {} MFT records", self.record_count());
        loop {
            let offset = reader.volume_offset();
            // a record split across two extents has no single offset to seek to
            let contiguous = reader.contiguous_remaining() >= record_size as u64;
            let n = fill_buffer(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let writer_gone = tee
                .as_ref()
                .is_some_and(|tx| tx.send(buf[..n].to_vec()).is_err());
            if writer_gone {
                warn!("$MFT writer went away, no longer copying records");
                tee = None;
            }
            if n < record_size {
                debug!("Ignoring {} trailing bytes after the last record", n);
                break;
            }

            if let Some(offset) = offset.filter(|_| contiguous) {
                state.record_offsets.insert(index, offset);
            }
            self.visit_record(&buf, offset.unwrap_or_default(), &mut state)?;
            index += 1;
        }
        drop(tee);

        state.report.directories = state.directories.len() as u64;
        state.report.possible_matches = state.possible.len() as u64;
        info!(
            "Scanned {} records: {} skipped, {} deleted, {} directories, {} possible matches",
            state.report.records_visited,
            state.report.records_skipped,
            state.report.records_deleted,
            state.report.directories,
            state.report.possible_matches
        );
        Ok(state)
    }

    fn visit_record(&self, raw: &[u8], offset: u64, state: &mut ScanState) -> Result<()> {
        state.report.records_visited += 1;
        let directory = is_directory_record(raw);

        let record = match MftRecord::from_bytes(raw, offset) {
            Ok(r) => r,
            Err(e) if e.is_recoverable() => {
                trace!("Skipping record at 0x{:X}: {}", offset, e);
                state.report.records_skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if record.header.is_deleted() {
            state.report.records_deleted += 1;
            return Ok(());
        }
        if record.header.is_extension() {
            return Ok(());
        }

        if directory {
            match record.canonical_name() {
                Some(name) => state.directories.add(UnresolvedDirectory {
                    record_number: record.record_number(),
                    name: name.name,
                    parent_record: name.parent_record,
                }),
                None => {
                    debug!("Directory record {} has no usable name", record.record_number());
                    state.report.records_skipped += 1;
                }
            }
            return Ok(());
        }

        let names = record.file_names();
        let Some(hit) = match_file_name(&self.config.terms, &names) else {
            return Ok(());
        };
        let bpc = self.geometry.bytes_per_cluster;
        let mut possible = PossibleMatch::new(record.record_number(), hit.clone());
        match record.data(bpc) {
            Some(Ok(data)) => possible.data.push(data),
            Some(Err(e)) => warn!("Record {}: unreadable $DATA: {}", record.record_number(), e),
            None => {}
        }
        match record.attribute_list(bpc) {
            Some(Ok(list)) => possible.attribute_list = Some(list),
            Some(Err(e)) => warn!(
                "Record {}: unreadable $ATTRIBUTE_LIST: {}",
                record.record_number(),
                e
            ),
            None => {}
        }
        debug!(
            "Possible match: record {} '{}'",
            possible.record_number, possible.file_name.name
        );
        state.possible.push(possible);
        Ok(())
    }

    /// Pull $DATA fragments out of extension records, reading through a
    /// separate handle so the scan cursor is never touched.
    fn resolve_attribute_lists(&self, state: &mut ScanState) -> Result<()> {
        for possible in state.possible.iter_mut() {
            let Some(list) = possible.attribute_list.take() else {
                continue;
            };
            let mut source = self.provider.open()?;
            let entries = match self.read_attribute_list(list) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Record {}: cannot read attribute list: {}",
                        possible.record_number, e
                    );
                    continue;
                }
            };

            for entry in data_entries(&entries, possible.record_number) {
                if possible.data.iter().any(|d| d.lowest_vcn() == entry.starting_vcn) {
                    continue;
                }
                let location = match state.record_offsets.get(&entry.record_number) {
                    Some(&offset) => RecordLocation::Offset(offset),
                    None => RecordLocation::Extents(&self.mft_runs),
                };
                match self.load_fragment(&mut source, location, possible.record_number, entry) {
                    Ok(Some(fragment)) => possible.data.push(fragment),
                    Ok(None) => {}
                    Err(e) => warn!(
                        "Record {}: extension record {} unusable: {}",
                        possible.record_number, entry.record_number, e
                    ),
                }
            }
            state.report.attribute_lists_resolved += 1;
        }
        Ok(())
    }

    /// Read the extension record `entry` points at and return the $DATA
    /// fragment it holds for `base`.
    fn load_fragment<V: VolumeSource>(
        &self,
        source: &mut V,
        location: RecordLocation<'_>,
        base: u64,
        entry: &AttributeListEntry,
    ) -> Result<Option<DataAttribute>> {
        let record_size = self.geometry.mft_record_size as usize;
        let (offset, buf) = match location {
            RecordLocation::Offset(offset) => {
                let mut buf = vec![0u8; record_size];
                source.read_exact_at(offset, &mut buf)?;
                (offset, buf)
            }
            RecordLocation::Extents(runs) => {
                match read_mft_record(source, runs, entry.record_number, record_size)? {
                    Some(found) => found,
                    None => {
                        warn!(
                            "Extension record {} lies outside the known $MFT extents",
                            entry.record_number
                        );
                        return Ok(None);
                    }
                }
            }
        };

        let record = MftRecord::from_bytes(&buf, offset)?;
        // base 0 is also what every ordinary record carries
        if record.record_number() != entry.record_number || record.header.base_record != base {
            warn!(
                "Record at 0x{:X} is number {} with base {}, expected number {} with base {}",
                offset,
                record.record_number(),
                record.header.base_record,
                entry.record_number,
                base
            );
            return Ok(None);
        }

        for raw in record.attributes_of(AttributeType::Data) {
            let fragment = DataAttribute::from_attribute(raw, self.geometry.bytes_per_cluster)?;
            if fragment.is_unnamed() && fragment.lowest_vcn() == entry.starting_vcn {
                return Ok(Some(fragment));
            }
        }
        debug!(
            "Record {} has no $DATA starting at VCN {}",
            entry.record_number, entry.starting_vcn
        );
        Ok(None)
    }

    /// Sub-entries of an attribute list, fetched from the volume when the
    /// list itself is non-resident.
    fn read_attribute_list(&self, list: AttributeList) -> Result<Vec<AttributeListEntry>> {
        match list {
            AttributeList::Resident(entries) => Ok(entries),
            AttributeList::NonResident { runs, real_size } => {
                let source = self.provider.open()?;
                let mut reader = ExtentReader::new(source, runs, Some(real_size));
                let mut value = Vec::new();
                reader.read_to_end(&mut value)?;
                decode_attribute_list(&value)
            }
        }
    }

    /// Write one confirmed file to the sink, through the host OS first when
    /// configured and through the raw extents otherwise.
    fn extract(&self, file: &ConfirmedFile, sink: &mut dyn ArtifactSink) -> Result<u64> {
        let name = normalize_output_path(&file.full_path);

        if self.config.prefer_os_reads && !file.full_path.starts_with(ORPHAN_PREFIX) {
            match File::open(&file.full_path) {
                Ok(mut f) => match sink.write_artifact(&name, &mut f) {
                    Ok(n) => return Ok(n),
                    Err(e) => debug!("OS read of '{}' failed: {}", file.full_path, e),
                },
                Err(e) => debug!("Cannot open '{}' through the OS: {}", file.full_path, e),
            }
        }

        if let Some(bytes) = &file.resident {
            return sink.write_artifact(&name, &mut bytes.as_slice());
        }
        if file.runs.is_empty() || file.size == 0 {
            return sink.write_artifact(&name, &mut io::empty());
        }
        let source = self.provider.open()?;
        let mut reader = ExtentReader::new(source, file.runs.clone(), Some(file.size));
        sink.write_artifact(&name, &mut reader)
    }
}

/// Read until `buf` is full or the stream ends.
fn fill_buffer<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Unnamed $DATA entries held outside `base`, ordered by starting VCN.
fn data_entries(entries: &[AttributeListEntry], base: u64) -> Vec<&AttributeListEntry> {
    let mut out: Vec<&AttributeListEntry> = entries
        .iter()
        .filter(|e| e.attr_type == DATA_TYPE_CODE && e.name_length == 0 && e.record_number != base)
        .collect();
    out.sort_by_key(|e| e.starting_vcn);
    out
}

fn sorted_runs(fragments: &[DataAttribute]) -> Vec<DataRun> {
    let mut ordered: Vec<&DataAttribute> = fragments.iter().collect();
    ordered.sort_by_key(|d| d.lowest_vcn());
    ordered.iter().flat_map(|d| d.runs().iter().copied()).collect()
}

/// Read MFT record `index` through the $MFT extents, a piece at a time when
/// it straddles two of them. `None` when the record is outside the extents
/// or falls into a sparse run.
fn read_mft_record<V: VolumeSource>(
    source: &mut V,
    runs: &[DataRun],
    index: u64,
    record_size: usize,
) -> Result<Option<(u64, Vec<u8>)>> {
    let Some(mut skip) = index.checked_mul(record_size as u64) else {
        return Ok(None);
    };
    let mut buf = vec![0u8; record_size];
    let mut filled = 0usize;
    let mut start = None;

    for run in runs {
        if skip >= run.length {
            skip -= run.length;
            continue;
        }
        if run.sparse {
            return Ok(None);
        }
        let take = ((run.length - skip) as usize).min(record_size - filled);
        let at = run.offset + skip;
        source.read_exact_at(at, &mut buf[filled..filled + take])?;
        start.get_or_insert(at);
        filled += take;
        skip = 0;
        if filled == record_size {
            return Ok(start.map(|at| (at, buf)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, CLUSTER_SIZE, MFT_SIZE, RECORD_SIZE};
    use crate::search::{TargetConfig, compile_targets};
    use crate::volume::MemoryVolume;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MemorySink {
        files: BTreeMap<String, Vec<u8>>,
        refuse: Option<&'static str>,
    }

    impl ArtifactSink for MemorySink {
        fn write_artifact(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64> {
            if self.refuse.is_some_and(|r| name.contains(r)) {
                return Err(CollectError::Sink(name.to_string(), "refused".into()));
            }
            let mut body = Vec::new();
            reader.read_to_end(&mut body)?;
            let n = body.len() as u64;
            self.files.insert(name.to_string(), body);
            Ok(n)
        }
    }

    fn config() -> ScanConfig {
        let config_dir = r"C:\Windows\System32\config";
        let targets = vec![
            TargetConfig::exact("C:", "$MFT"),
            TargetConfig::exact("C:", "notes.txt"),
            TargetConfig::exact(config_dir, "SAM"),
            TargetConfig::exact(config_dir, "SYSTEM"),
            TargetConfig::exact(config_dir, "SECURITY"),
        ];
        let mut config = ScanConfig::new("C", compile_targets(&targets).unwrap());
        config.mft_channel_capacity = 2;
        config
    }

    fn collector() -> Collector<MemoryVolume> {
        Collector::new(MemoryVolume::new(fixtures::volume()), config()).unwrap()
    }

    #[test]
    fn locates_mft_extents() {
        let c = collector();
        assert_eq!(c.geometry().mft_byte_offset, 4 * CLUSTER_SIZE as u64);
        assert_eq!(c.mft_size(), MFT_SIZE);
        assert_eq!(c.record_count(), 16);
        assert_eq!(
            c.mft_runs(),
            &[
                DataRun::new(4 * CLUSTER_SIZE as u64, 2 * CLUSTER_SIZE as u64),
                DataRun::new(10 * CLUSTER_SIZE as u64, 2 * CLUSTER_SIZE as u64),
            ]
        );
    }

    #[test]
    fn rejects_volume_without_boot_sector() {
        let err = Collector::new(MemoryVolume::new(vec![0u8; 4096]), config())
            .err()
            .unwrap();
        assert!(matches!(err, CollectError::InvalidBootRecord(_)));
    }

    #[test]
    fn collects_targets_and_copies_mft_during_scan() {
        let disk = fixtures::volume();
        let c = collector();
        let mut sink = MemorySink::default();
        let outcome = c.collect(&mut sink).unwrap();

        let mft = outcome
            .confirmed
            .iter()
            .find(|f| f.record_number == 0)
            .expect("$MFT confirmed");
        assert_eq!(mft.full_path, r"C:\$MFT");
        assert!(!mft.runs.is_empty());

        assert_eq!(outcome.tree.get(5), Some("C:"));
        assert_eq!(outcome.tree.get(8), Some(r"C:\Windows\System32\config"));
        assert_eq!(outcome.tree.get(15), Some(r"$ORPHANFILE\lost"));

        let mut expected_mft = disk[4 * CLUSTER_SIZE..6 * CLUSTER_SIZE].to_vec();
        expected_mft.extend_from_slice(&disk[10 * CLUSTER_SIZE..12 * CLUSTER_SIZE]);
        assert_eq!(sink.files["C__$MFT"], expected_mft);
        assert_eq!(sink.files["C__notes.txt"], b"hello");
        assert_eq!(
            sink.files["C__Windows_System32_config_SAM"],
            fixtures::sam_contents()
        );
        assert_eq!(
            sink.files["C__Windows_System32_config_SYSTEM"],
            fixtures::system_contents()
        );
        assert!(!sink.files.keys().any(|k| k.contains("SECURITY")));

        let report = &outcome.report;
        assert_eq!(report.records_visited, 16);
        assert_eq!(report.records_skipped, 5);
        assert_eq!(report.records_deleted, 1);
        assert_eq!(report.directories, 5);
        assert_eq!(report.possible_matches, 4);
        assert_eq!(report.attribute_lists_resolved, 1);
        assert_eq!(report.confirmed, 4);
        assert_eq!(report.extracted, 4);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn attribute_list_fragments_are_merged() {
        let outcome = collector().locate().unwrap();
        let system = outcome
            .confirmed
            .iter()
            .find(|f| f.full_path.ends_with("SYSTEM"))
            .unwrap();
        assert_eq!(system.size, fixtures::SYSTEM_SIZE as u64);
        assert_eq!(
            system.runs,
            vec![DataRun::new(
                (fixtures::SYSTEM_CLUSTER * CLUSTER_SIZE) as u64,
                CLUSTER_SIZE as u64
            )]
        );
    }

    #[test]
    fn failed_mft_copy_is_retried_then_counted() {
        let c = collector();
        let mut sink = MemorySink {
            refuse: Some("$MFT"),
            ..Default::default()
        };
        let outcome = c.collect(&mut sink).unwrap();
        assert_eq!(outcome.report.extracted, 3);
        assert_eq!(outcome.report.failed, 1);
        assert!(sink.files.contains_key("C__notes.txt"));
    }

    #[test]
    fn os_reads_fall_back_to_extents() {
        let mut config = config();
        config.prefer_os_reads = true;
        let c = Collector::new(MemoryVolume::new(fixtures::volume()), config).unwrap();
        let mut sink = MemorySink::default();
        c.collect(&mut sink).unwrap();
        assert_eq!(
            sink.files["C__Windows_System32_config_SAM"],
            fixtures::sam_contents()
        );
    }

    #[test]
    fn fragmented_mft_and_non_resident_attribute_list() {
        let config_dir = r"C:\Windows\System32\config";
        let targets = vec![
            TargetConfig::exact("C:", "$MFT"),
            TargetConfig::exact(config_dir, "SOFTWARE"),
        ];
        let config = ScanConfig::new("C", compile_targets(&targets).unwrap());
        let disk = fixtures::fragmented_volume();
        let c = Collector::new(MemoryVolume::new(disk.clone()), config).unwrap();

        let extents: Vec<DataRun> = fixtures::MFT_EXTENTS
            .iter()
            .map(|&(start, len)| DataRun::new(start as u64, len as u64))
            .collect();
        assert_eq!(c.mft_runs(), extents.as_slice());
        assert_eq!(c.mft_size(), MFT_SIZE);
        assert_eq!(c.record_count(), 16);

        let mut sink = MemorySink::default();
        let outcome = c.collect(&mut sink).unwrap();

        let software = outcome
            .confirmed
            .iter()
            .find(|f| f.record_number == 14)
            .expect("SOFTWARE confirmed");
        assert_eq!(software.full_path, r"C:\Windows\System32\config\SOFTWARE");
        assert_eq!(software.size, fixtures::SOFTWARE_SIZE as u64);
        assert_eq!(
            software.runs,
            vec![DataRun::new(
                (fixtures::SOFTWARE_CLUSTER * fixtures::SMALL_CLUSTER) as u64,
                2 * fixtures::SMALL_CLUSTER as u64
            )]
        );
        assert_eq!(
            sink.files["C__Windows_System32_config_SOFTWARE"],
            fixtures::software_contents()
        );

        let mft = outcome
            .confirmed
            .iter()
            .find(|f| f.record_number == 0)
            .expect("$MFT confirmed");
        assert_eq!(mft.runs, extents);
        let mut expected_mft = Vec::new();
        for &(start, len) in &fixtures::MFT_EXTENTS {
            expected_mft.extend_from_slice(&disk[start..start + len]);
        }
        assert_eq!(sink.files["C__$MFT"], expected_mft);

        assert_eq!(outcome.report.records_visited, 16);
        assert_eq!(outcome.report.attribute_lists_resolved, 2);
        assert_eq!(outcome.report.confirmed, 2);
        assert_eq!(outcome.report.extracted, 2);
        assert_eq!(outcome.report.failed, 0);
    }

    #[test]
    fn fragment_from_the_wrong_record_is_ignored() {
        let c = collector();
        let mut source = c.provider.open().unwrap();
        let entry = AttributeListEntry {
            attr_type: DATA_TYPE_CODE,
            entry_length: 0x20,
            name_length: 0,
            starting_vcn: 0,
            record_number: 3,
            record_sequence: 1,
            attribute_id: 0,
        };
        // record 10 is an ordinary file, so its base is 0 as well
        let notes = RecordLocation::Offset(fixtures::record_offset(10) as u64);
        let fragment = c.load_fragment(&mut source, notes, MFT_RECORD_NUMBER, &entry);
        assert!(fragment.unwrap().is_none());

        let entry = AttributeListEntry {
            record_number: 12,
            ..entry
        };
        let system = RecordLocation::Offset(fixtures::record_offset(12) as u64);
        let fragment = c.load_fragment(&mut source, system, 11, &entry).unwrap();
        assert_eq!(fragment.unwrap().size(), Some(fixtures::SYSTEM_SIZE as u64));
    }

    #[test]
    fn records_are_read_across_extent_boundaries() {
        let disk: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        let mut source = MemoryVolume::new(disk).open().unwrap();
        let runs = vec![DataRun::new(8, 12), DataRun::new(40, 16), DataRun::sparse(8)];

        let (at, bytes) = read_mft_record(&mut source, &runs, 1, 8).unwrap().unwrap();
        assert_eq!(at, 16);
        assert_eq!(bytes, vec![16, 17, 18, 19, 40, 41, 42, 43]);
        assert_eq!(read_mft_record(&mut source, &runs, 0, 8).unwrap().unwrap().0, 8);
        // tail falls into the sparse run
        assert!(read_mft_record(&mut source, &runs, 3, 8).unwrap().is_none());
        // past the last extent
        assert!(read_mft_record(&mut source, &runs, 5, 8).unwrap().is_none());
    }
}
