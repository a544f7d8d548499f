//! Steady-state latency measurement for [`TextToImage`] pipelines.
//!
//! The first call of a pipeline usually pays for lazy initialization, graph compilation and cache
//! warming. [`elapsed_time`] runs one untimed warm-up call first so that only steady-state calls
//! contribute to the reported mean.

use std::{num::NonZeroUsize, time::Instant};

use serde::Serialize;
use tracing::{debug, info_span};

use crate::{Backend, TextToImage};

/// Denoising steps used for the untimed warm-up call, independent of the timed step count.
pub const WARMUP_STEPS: usize = 10;
pub const DEFAULT_NB_PASS: usize = 4;
pub const DEFAULT_NUM_INFERENCE_STEPS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BenchmarkError {
    #[error("the benchmark prompt must not be empty")]
    EmptyPrompt,
    #[error("at least one timed pass is required")]
    ZeroPasses,
    #[error("at least one inference step is required")]
    ZeroSteps,
}

/// What to run for a benchmark. Always holds a non-empty prompt and positive counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkConfig {
    prompt: String,
    nb_pass: NonZeroUsize,
    num_inference_steps: NonZeroUsize,
}

impl BenchmarkConfig {
    /// Uses [`DEFAULT_NB_PASS`] timed passes of [`DEFAULT_NUM_INFERENCE_STEPS`] steps each.
    pub fn new<S: ToString>(prompt: S) -> Result<Self, BenchmarkError> {
        let prompt = prompt.to_string();
        if prompt.is_empty() {
            return Err(BenchmarkError::EmptyPrompt);
        }
        Ok(Self {
            prompt,
            nb_pass: NonZeroUsize::new(DEFAULT_NB_PASS).ok_or(BenchmarkError::ZeroPasses)?,
            num_inference_steps: NonZeroUsize::new(DEFAULT_NUM_INFERENCE_STEPS)
                .ok_or(BenchmarkError::ZeroSteps)?,
        })
    }

    pub fn with_nb_pass(mut self, nb_pass: usize) -> Result<Self, BenchmarkError> {
        self.nb_pass = NonZeroUsize::new(nb_pass).ok_or(BenchmarkError::ZeroPasses)?;
        Ok(self)
    }

    pub fn with_num_inference_steps(mut self, steps: usize) -> Result<Self, BenchmarkError> {
        self.num_inference_steps = NonZeroUsize::new(steps).ok_or(BenchmarkError::ZeroSteps)?;
        Ok(self)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn nb_pass(&self) -> usize {
        self.nb_pass.get()
    }

    pub fn num_inference_steps(&self) -> usize {
        self.num_inference_steps.get()
    }
}

/// Mean wall-clock seconds per call of `pipeline`, over `config.nb_pass()` sequential calls.
///
/// One warm-up call with [`WARMUP_STEPS`] steps runs before the clock starts. Outputs are
/// discarded. The first error from the pipeline is returned as is and no further calls are made.
#[allow(clippy::cast_precision_loss)]
pub fn elapsed_time<P>(pipeline: &P, config: &BenchmarkConfig) -> Result<f64, P::Error>
where
    P: TextToImage + ?Sized,
{
    let _span = info_span!(
        "elapsed_time",
        nb_pass = config.nb_pass(),
        num_inference_steps = config.num_inference_steps()
    )
    .entered();

    pipeline.generate(config.prompt(), WARMUP_STEPS)?;
    debug!("warm-up call finished");

    let start = Instant::now();
    for _ in 0..config.nb_pass() {
        pipeline.generate(config.prompt(), config.num_inference_steps())?;
    }
    let end = Instant::now();

    let mean = end.duration_since(start).as_secs_f64() / config.nb_pass() as f64;
    debug!("mean latency {mean:.4}s");
    Ok(mean)
}

/// Mean latencies of a baseline pipeline and its accelerated counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyComparison {
    pub baseline: f64,
    pub accelerated: f64,
}

impl LatencyComparison {
    /// How many times faster the accelerated pipeline is.
    pub fn speedup(&self) -> f64 {
        self.baseline / self.accelerated
    }
}

/// Benchmark `baseline` then `accelerated` with the same config.
pub fn compare<B, A, E>(
    baseline: &B,
    accelerated: &A,
    config: &BenchmarkConfig,
) -> Result<LatencyComparison, E>
where
    B: TextToImage<Error = E> + ?Sized,
    A: TextToImage<Error = E> + ?Sized,
{
    let baseline = elapsed_time(baseline, config)?;
    let accelerated = elapsed_time(accelerated, config)?;
    Ok(LatencyComparison {
        baseline,
        accelerated,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRun {
    pub backend: Backend,
    pub reshaped: bool,
    pub mean_latency_secs: f64,
}

/// Serializable summary of a baseline/accelerated comparison.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub prompt: String,
    pub nb_pass: usize,
    pub num_inference_steps: usize,
    pub warmup_steps: usize,
    pub height: usize,
    pub width: usize,
    pub runs: Vec<BenchmarkRun>,
    pub speedup: Option<f64>,
}

impl BenchmarkReport {
    pub fn new(config: &BenchmarkConfig, height: usize, width: usize) -> Self {
        Self {
            prompt: config.prompt().to_string(),
            nb_pass: config.nb_pass(),
            num_inference_steps: config.num_inference_steps(),
            warmup_steps: WARMUP_STEPS,
            height,
            width,
            runs: Vec::new(),
            speedup: None,
        }
    }

    pub fn push(&mut self, run: BenchmarkRun) {
        self.runs.push(run);
    }

    /// Record an eager baseline and a compiled accelerated run along with their speedup.
    pub fn with_comparison(mut self, comparison: LatencyComparison, reshaped: bool) -> Self {
        self.push(BenchmarkRun {
            backend: Backend::Eager,
            reshaped: false,
            mean_latency_secs: comparison.baseline,
        });
        self.push(BenchmarkRun {
            backend: Backend::Compiled,
            reshaped,
            mean_latency_secs: comparison.accelerated,
        });
        self.speedup = Some(comparison.speedup());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, thread, time::Duration};

    use super::{
        compare, elapsed_time, BenchmarkConfig, BenchmarkError, BenchmarkReport, LatencyComparison,
        WARMUP_STEPS,
    };
    use crate::{pipeline_fn, TextToImage};

    /// Records the step count of every call and sleeps for a fixed duration.
    struct Recorder {
        calls: RefCell<Vec<usize>>,
        delay: Duration,
        warmup_delay: Duration,
        fail_on: Option<usize>,
    }

    impl Recorder {
        fn new(delay: Duration) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                delay,
                warmup_delay: delay,
                fail_on: None,
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on = Some(call);
            self
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.borrow().clone()
        }
    }

    impl TextToImage for Recorder {
        type Output = ();
        type Error = String;

        fn generate(&self, _prompt: &str, num_inference_steps: usize) -> Result<(), String> {
            let index = {
                let mut calls = self.calls.borrow_mut();
                calls.push(num_inference_steps);
                calls.len() - 1
            };
            if self.fail_on == Some(index) {
                return Err(format!("failed on call {index}"));
            }
            thread::sleep(if index == 0 {
                self.warmup_delay
            } else {
                self.delay
            });
            Ok(())
        }
    }

    fn config(nb_pass: usize) -> BenchmarkConfig {
        BenchmarkConfig::new("sailing ship in storm by Rembrandt")
            .and_then(|c| c.with_nb_pass(nb_pass))
            .expect("valid config")
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let config = BenchmarkConfig::new("a cat")?;
        assert_eq!(config.nb_pass(), 4);
        assert_eq!(config.num_inference_steps(), 20);
        Ok(())
    }

    #[test]
    fn rejects_invalid_configs() {
        assert_eq!(BenchmarkConfig::new(""), Err(BenchmarkError::EmptyPrompt));
        assert_eq!(
            BenchmarkConfig::new("a cat").and_then(|c| c.with_nb_pass(0)),
            Err(BenchmarkError::ZeroPasses)
        );
        assert_eq!(
            BenchmarkConfig::new("a cat").and_then(|c| c.with_num_inference_steps(0)),
            Err(BenchmarkError::ZeroSteps)
        );
    }

    #[test]
    fn one_warmup_then_nb_pass_timed_calls() -> anyhow::Result<()> {
        let pipeline = Recorder::new(Duration::ZERO);
        let config = config(4).with_num_inference_steps(7)?;
        elapsed_time(&pipeline, &config).map_err(anyhow::Error::msg)?;
        assert_eq!(pipeline.calls(), vec![WARMUP_STEPS, 7, 7, 7, 7]);
        Ok(())
    }

    #[test]
    fn average_matches_constant_duration() -> anyhow::Result<()> {
        let delay = Duration::from_millis(20);
        let pipeline = Recorder::new(delay);
        let mean = elapsed_time(&pipeline, &config(4)).map_err(anyhow::Error::msg)?;
        assert!(mean >= delay.as_secs_f64(), "mean {mean}");
        assert!(mean < 3. * delay.as_secs_f64(), "mean {mean}");
        Ok(())
    }

    #[test]
    fn single_pass_is_not_averaged() -> anyhow::Result<()> {
        let delay = Duration::from_millis(30);
        let pipeline = Recorder::new(delay);
        let mean = elapsed_time(&pipeline, &config(1)).map_err(anyhow::Error::msg)?;
        assert_eq!(pipeline.calls().len(), 2);
        assert!(mean >= delay.as_secs_f64(), "mean {mean}");
        assert!(mean < 3. * delay.as_secs_f64(), "mean {mean}");
        Ok(())
    }

    #[test]
    fn warmup_cost_is_excluded() -> anyhow::Result<()> {
        let mut pipeline = Recorder::new(Duration::from_millis(5));
        pipeline.warmup_delay = Duration::from_millis(300);
        let mean = elapsed_time(&pipeline, &config(2)).map_err(anyhow::Error::msg)?;
        assert!(mean < 0.15, "mean {mean} includes the warm-up call");
        Ok(())
    }

    #[test]
    fn warmup_failure_stops_everything() {
        let pipeline = Recorder::new(Duration::ZERO).failing_on(0);
        let err = elapsed_time(&pipeline, &config(4)).unwrap_err();
        assert_eq!(err, "failed on call 0");
        assert_eq!(pipeline.calls(), vec![WARMUP_STEPS]);
    }

    #[test]
    fn timed_failure_stops_remaining_passes() {
        // Call 2 is the second timed pass.
        let pipeline = Recorder::new(Duration::ZERO).failing_on(2);
        let err = elapsed_time(&pipeline, &config(4)).unwrap_err();
        assert_eq!(err, "failed on call 2");
        assert_eq!(pipeline.calls().len(), 3);
    }

    #[test]
    fn repeated_runs_agree() -> anyhow::Result<()> {
        let delay = Duration::from_millis(15);
        let pipeline = Recorder::new(delay);
        let first = elapsed_time(&pipeline, &config(3)).map_err(anyhow::Error::msg)?;
        let second = elapsed_time(&pipeline, &config(3)).map_err(anyhow::Error::msg)?;
        assert!((first - second).abs() < 2. * delay.as_secs_f64());
        Ok(())
    }

    #[test]
    fn closures_and_comparison() -> anyhow::Result<()> {
        let slow = pipeline_fn(|_: &str, steps: usize| {
            thread::sleep(Duration::from_millis(2 * steps as u64));
            Ok::<_, String>(())
        });
        let fast = pipeline_fn(|_: &str, _: usize| Ok::<_, String>(()));
        let config = config(2).with_num_inference_steps(10)?;
        let comparison = compare(&slow, &fast, &config).map_err(anyhow::Error::msg)?;
        assert!(comparison.baseline >= 0.02);
        assert!(comparison.accelerated < comparison.baseline);
        assert!(comparison.speedup() > 1.);
        Ok(())
    }

    #[test]
    fn report_lists_runs_and_speedup() -> anyhow::Result<()> {
        let comparison = LatencyComparison {
            baseline: 2.0,
            accelerated: 0.5,
        };
        let json = BenchmarkReport::new(&config(4), 512, 512)
            .with_comparison(comparison, true)
            .to_json()?;
        let report: serde_json::Value = serde_json::from_str(&json)?;

        assert_eq!(report["prompt"], "sailing ship in storm by Rembrandt");
        assert_eq!(report["nb_pass"], 4);
        assert_eq!(report["num_inference_steps"], 20);
        assert_eq!(report["warmup_steps"], 10);
        assert_eq!(report["height"], 512);

        let runs = report["runs"].as_array().map(Vec::as_slice).unwrap_or_default();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0]["backend"], "eager");
        assert_eq!(runs[0]["reshaped"], false);
        assert_eq!(runs[0]["mean_latency_secs"], 2.0);
        assert_eq!(runs[1]["backend"], "compiled");
        assert_eq!(runs[1]["reshaped"], true);
        assert_eq!(runs[1]["mean_latency_secs"], 0.5);
        assert_eq!(report["speedup"], 4.0);
        Ok(())
    }

    #[test]
    fn report_without_comparison_has_no_speedup() -> anyhow::Result<()> {
        let report: serde_json::Value =
            serde_json::from_str(&BenchmarkReport::new(&config(1), 64, 64).to_json()?)?;
        assert!(report["runs"].as_array().is_some_and(Vec::is_empty));
        assert!(report["speedup"].is_null());
        Ok(())
    }
}
