use std::fmt;

use chainloader::chain::{ChainExecutor, Launcher, ProcessArgs};
use chainloader::entry::{EntryAddress, LoaderEntry};
use chainloader::host::HostStorage;
use chainloader::menu::{select_payload, MenuInput, PayloadMenu};
use chainloader::payloads::{discover, PayloadCatalog};
use chainloader::sim::{MemoryOp, SimHeap, SimKernel, SimMemory};
use serde::Serialize;

use super::require_sd_root;
use crate::cli::RunArgs;
use crate::config::ToolConfig;
use crate::error::ToolError;

/// Heap handed to the simulated chain.
const SIM_HEAP_SIZE: usize = 1 << 20;

/// Launcher that never executes foreign code.
pub struct DryRunLauncher;

impl Launcher for DryRunLauncher {
    unsafe fn launch(&mut self, entry: EntryAddress, args: &ProcessArgs) -> i32 {
        log::info!("dry run: would jump to {} with {} args", entry, args.argc);
        0
    }
}

/// Result of `run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub path: String,
    /// Menu screen after the key presses, when the menu was shown.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub menu: Vec<String>,
    pub executed: bool,
    pub entry: Option<u32>,
    pub exit_code: i32,
    pub sections_written: usize,
    pub bytes_written: u64,
    pub reclaimed: usize,
    pub tables_restored: bool,
    pub trail: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.menu {
            writeln!(f, "{line}")?;
        }
        writeln!(f, "payload   {}", self.path)?;
        match self.entry {
            Some(entry) => writeln!(f, "entry     {entry:#010x}")?,
            None => writeln!(f, "entry     none")?,
        }
        writeln!(
            f,
            "placed    {} section(s), {} bytes",
            self.sections_written, self.bytes_written
        )?;
        writeln!(f, "exit      {}", self.exit_code)?;
        writeln!(f, "reclaimed {}", self.reclaimed)?;
        writeln!(
            f,
            "tables    {}",
            if self.tables_restored { "restored" } else { "MODIFIED" }
        )?;
        writeln!(f, "trail     {}", self.trail.join(" -> "))
    }
}

/// Choose the payload: explicit path, menu, or configured default.
fn choose_path(
    args: &RunArgs,
    config: &ToolConfig,
    storage: &mut HostStorage,
) -> (String, Vec<String>) {
    if let Some(path) = &args.path {
        return (path.clone(), Vec::new());
    }

    let catalog = if args.select {
        discover(storage, &config.payload_dir)
    } else {
        PayloadCatalog::new()
    };
    let inputs: Vec<MenuInput> = args.keys.iter().map(|&key| key.into()).collect();
    let path = select_payload(
        args.select,
        &catalog,
        &config.default_payload,
        inputs.iter().copied(),
    );

    let mut screen = Vec::new();
    if args.select && !catalog.is_empty() {
        let mut menu = PayloadMenu::new(&catalog);
        for &input in &inputs {
            if menu.handle(input).is_some() {
                break;
            }
        }
        let mut text = String::new();
        if menu.render(&mut text).is_ok() {
            screen = text.lines().map(str::to_string).collect();
        }
    }

    (path, screen)
}

/// Dry-run the chain against the simulated kernel and memory.
///
/// When nothing was executed the payload is loaded again into scratch
/// memory and the typed load error is returned instead of a summary.
pub fn run(args: &RunArgs, config: &ToolConfig) -> Result<RunSummary, ToolError> {
    require_sd_root(&config.sd_root)?;

    let mut storage = HostStorage::new(&config.sd_root);
    let (path, menu) = choose_path(args, config, &mut storage);

    let mut kernel = SimKernel::new();
    let tables_before = kernel.table_snapshot();
    let mut memory = SimMemory::new();
    let heap = SimHeap::new(SIM_HEAP_SIZE);

    let report = ChainExecutor::new(&mut kernel, &mut storage, &mut memory, &heap, DryRunLauncher)
        .run(&path, &ProcessArgs::empty());

    let trail: Vec<String> = report.trail.iter().map(|state| state.to_string()).collect();
    if !report.executed() {
        log::info!("chain trail: {}", trail.join(" -> "));
        if let Err(e) = LoaderEntry::new(&mut storage, &mut SimMemory::new()).try_load(&path) {
            return Err(ToolError::Load(e));
        }
    }

    let (sections_written, bytes_written) = memory
        .ops()
        .iter()
        .filter_map(|op| match *op {
            MemoryOp::Copy { len, .. } | MemoryOp::Fill { len, .. } => Some(len as u64),
            _ => None,
        })
        .fold((0, 0), |(count, bytes), len| (count + 1, bytes + len));

    Ok(RunSummary {
        path,
        menu,
        executed: report.executed(),
        entry: report.executed().then(|| report.entry.get()),
        exit_code: report.exit_code,
        sections_written,
        bytes_written,
        reclaimed: report.reclaimed,
        tables_restored: kernel.table_snapshot() == tables_before,
        trail,
    })
}
