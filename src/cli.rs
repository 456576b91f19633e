// SIDFlow render CLI binary

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use sidflow_render::constants::PROGRESS_CHANNEL_CAPACITY;
use sidflow_render::engine::sidplayfp::SidplayfpEngine;
use sidflow_render::jobs::discover::discover_sid_files;
use sidflow_render::jobs::progress::progress_channel;
use sidflow_render::options::{parse_render_args, SidSelection};
use sidflow_render::render::encode::FormatEncoder;
use sidflow_render::songlength::SongLengthCache;
use sidflow_render::{
    build_wav_cache, tools, BuildOptions, BuildReport, EngineRegistry, RenderCache, RenderConfig,
    RenderOrchestrator,
};

const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_ALL_FAILED: u8 = 1;

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let parsed = parse_render_args(std::env::args_os());
    if let Some(message) = &parsed.message {
        print!("{}", message);
        return Ok(ExitCode::SUCCESS);
    }
    if !parsed.is_ok() {
        for error in &parsed.errors {
            eprintln!("error: {}", error);
        }
        eprintln!("Run 'sidflow-render --help' for usage.");
        return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
    }
    let options = parsed.options;

    let config = match RenderConfig::load(options.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
        }
    };

    // Sources, roots and cache paths are compared by prefix, so all are made absolute.
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let sid_root = absolute(&cwd, &config.sid_path);
    let orchestrator = build_orchestrator(&config, &sid_root);
    let cache = RenderCache::new(&sid_root, absolute(&cwd, &config.wav_cache_path));

    // One pool run per sub-tune selection; a plain run has a single group.
    let groups: BTreeMap<Option<u32>, Vec<PathBuf>> = if options.sids.is_empty() {
        let files = discover_sid_files(&sid_root)
            .with_context(|| format!("Failed to list SID files under {}", sid_root.display()))?;
        BTreeMap::from([(None, files)])
    } else {
        group_by_song(&cwd, &options.sids)
    };

    let (sink, updates) = progress_channel(PROGRESS_CHANNEL_CAPACITY);
    let observer = std::thread::Builder::new()
        .name("progress-observer".into())
        .spawn(move || {
            for update in updates.iter() {
                match &update.current_file {
                    Some(file) => log::debug!("worker {} {:?} {}", update.worker_id, update.phase, file.display()),
                    None => log::debug!("worker {} {:?}", update.worker_id, update.phase),
                }
            }
        })
        .context("Failed to spawn progress observer")?;

    let base = BuildOptions {
        threads: options.threads.unwrap_or_else(|| config.effective_threads()),
        force_rebuild: options.force_rebuild,
        formats: options.formats.clone().unwrap_or_else(|| config.default_formats.clone()),
        engine: options.engine,
        song_index: None,
        target_duration_ms: options.target_duration_ms,
        max_render_seconds: config.max_render_sec,
        progress: sink,
        cancel: None,
    };

    let mut total = BuildReport::default();
    for (song_index, files) in groups {
        let run_options = BuildOptions { song_index, ..base.clone() };
        let report = build_wav_cache(&orchestrator, &cache, &files, &run_options)?;
        merge(&mut total, report);
    }

    drop(base);
    let _ = observer.join();

    print_summary(&total);

    if total.metrics.failed > 0 && total.metrics.rendered == 0 {
        return Ok(ExitCode::from(EXIT_ALL_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

fn build_orchestrator(config: &RenderConfig, sid_root: &Path) -> RenderOrchestrator {
    let mut registry = EngineRegistry::new();

    let sidplayfp = tools::sidplayfp_path(config.sidplay_path.as_deref());
    if tools::is_tool_available(&sidplayfp) {
        log::info!("Using sidplayfp at {}", sidplayfp.display());
        registry.register(Arc::new(
            SidplayfpEngine::new(sidplayfp)
                .with_extra_args(config.sidplay_args.clone())
                .with_kill_grace(config.policy.kill_grace),
        ));
    } else {
        log::warn!("sidplayfp not found ({}); no external engine registered", sidplayfp.display());
    }

    let ffmpeg = tools::ffmpeg_path(config.ffmpeg_path.as_deref());
    let mut orchestrator = RenderOrchestrator::new(registry)
        .with_preferred(config.preferred_engines.clone())
        .with_policy(&config.policy)
        .with_encoder(FormatEncoder::new(ffmpeg));

    if let Some(db_path) = config.songlengths_file() {
        let lengths = SongLengthCache::new();
        match lengths.get_or_load(sid_root, &db_path) {
            Ok(db) => orchestrator = orchestrator.with_lengths(db),
            Err(e) => log::warn!("Song lengths unavailable: {}", e),
        }
    }

    orchestrator
}

fn group_by_song(cwd: &Path, sids: &[SidSelection]) -> BTreeMap<Option<u32>, Vec<PathBuf>> {
    let mut groups: BTreeMap<Option<u32>, Vec<PathBuf>> = BTreeMap::new();
    for sid in sids {
        let path = absolute(cwd, &sid.path);
        let files = groups.entry(sid.song_index).or_default();
        if !files.contains(&path) {
            files.push(path);
        }
    }
    groups
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    }
}

fn merge(total: &mut BuildReport, report: BuildReport) {
    total.metrics.total += report.metrics.total;
    total.metrics.rendered += report.metrics.rendered;
    total.metrics.skipped += report.metrics.skipped;
    total.metrics.failed += report.metrics.failed;
    total.rendered.extend(report.rendered);
    total.skipped.extend(report.skipped);
    total.failed.extend(report.failed);
    total.cancelled |= report.cancelled;
    total.elapsed += report.elapsed;
}

fn print_summary(report: &BuildReport) {
    println!();
    println!("Render complete:");
    println!("  Total files:  {}", report.metrics.total);
    println!("  Rendered:     {}", report.metrics.rendered);
    println!("  Skipped:      {}", report.metrics.skipped);
    println!("  Failed:       {}", report.metrics.failed);
    println!("  Elapsed:      {:.1}s", report.elapsed.as_secs_f64());

    if !report.failed.is_empty() {
        println!();
        println!("Failures:");
        for failure in &report.failed {
            let song = failure.song_index.map(|s| format!("#{}", s)).unwrap_or_default();
            println!("  {}{} [{}]: {}", failure.source_path.display(), song, failure.engine, failure.error);
        }
    }
}
