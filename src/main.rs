use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use sonoscope::audio::wav::WavSource;
use sonoscope::output::{PipelineEvent, SharedOutput};
use sonoscope::pipeline::orchestrator::{BuildRequest, PipelineOrchestrator};
use sonoscope::settings::SettingsManager;
use sonoscope::util::telemetry;

fn main() -> Result<()> {
    telemetry::init();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: sonoscope <file.wav>")?;

    let settings = SettingsManager::load_or_default();
    let source = WavSource::open(&path).with_context(|| format!("open {}", path.display()))?;

    let (output, events) = SharedOutput::new();
    let orchestrator = PipelineOrchestrator::new(Arc::clone(&output));
    let request = BuildRequest {
        settings: settings.render_settings(),
        ..BuildRequest::default()
    };
    let summary = orchestrator
        .build(Box::new(source), request)
        .context("build pipeline")?;

    let range = orchestrator.auto_bnc(1.0, 1.0);
    orchestrator
        .apply_bnc(range)
        .context("apply brightness/contrast")?;

    let mut redraws = 0u64;
    let mut triggers = 0u64;
    while let Ok(event) = events.try_recv() {
        match event {
            PipelineEvent::Redraw(_) => redraws += 1,
            PipelineEvent::Trigger(mark) => {
                triggers += 1;
                info!("trigger at {:.3} s, {:.1} dB", mark.time_secs, mark.peak_db);
            }
        }
    }

    println!("{summary}");
    println!("auto BnC [{:.3}, {:.3}]", range.low, range.high);
    if let Some((width, height)) = output.colour().dimensions() {
        println!("colour image {width}x{height}");
    }
    println!("{redraws} redraw events, {triggers} triggers");
    let dropped = output.dropped_events();
    if dropped > 0 {
        println!("{dropped} events dropped");
    }
    Ok(())
}
