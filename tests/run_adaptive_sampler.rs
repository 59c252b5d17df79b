use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use nuts_dispatch::{
    config_adaptive_sampler, create_rng, run_adaptive_sampler, AdaptDiagNuts, AdaptSettings,
    Adaptation, AdaptiveSampler, CancelAfter, CsvWriter, Dispatcher, Draw, JsonWriter, Logger,
    LogpError, Model, NeverInterrupt, NullLogger, NutsError, RunSettings, Sink, StructChannel,
    TableChannel, STAT_NAMES,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use thiserror::Error;

/// `mu ~ N(0, 1)` and `sigma ~ LogNormal(0, 1)`, sampled on `(mu, log sigma)`.
struct TestLp;

#[derive(Error, Debug)]
enum TestLpError {
    #[error("position is not finite")]
    NotFinite,
}

impl LogpError for TestLpError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

impl Model for TestLp {
    type LogpError = TestLpError;

    fn dim(&self) -> usize {
        2
    }

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, TestLpError> {
        if !position.iter().all(|x| x.is_finite()) {
            return Err(TestLpError::NotFinite);
        }
        grad.iter_mut()
            .zip(position.iter())
            .for_each(|(g, &x)| *g = -x);
        Ok(-position.iter().map(|x| x * x / 2.).sum::<f64>())
    }

    fn variables(&self) -> Vec<(String, Vec<usize>)> {
        vec![("mu".to_string(), vec![]), ("sigma".to_string(), vec![])]
    }

    fn constrain(&mut self, position: &[f64], out: &mut Vec<f64>) -> Result<(), TestLpError> {
        out.clear();
        out.push(position[0]);
        out.push(position[1].exp());
        Ok(())
    }
}

#[derive(Default)]
struct Lines(Vec<String>);

impl Logger for Lines {
    fn info(&mut self, message: &str) {
        self.0.push(message.to_string());
    }

    fn warn(&mut self, message: &str) {
        self.0.push(message.to_string());
    }
}

type Stream = Rc<RefCell<Vec<u8>>>;

/// One in-memory stream per channel.
#[derive(Default)]
struct Streams {
    draw_sample: Stream,
    draw_warmup: Stream,
    uparams_sample: Stream,
    uparams_warmup: Stream,
    algo: Stream,
    metric: Stream,
    timing: Stream,
}

impl Streams {
    fn table(&self, channel: TableChannel) -> &Stream {
        match channel {
            TableChannel::DrawSample => &self.draw_sample,
            TableChannel::DrawWarmup => &self.draw_warmup,
            TableChannel::UparamsSample => &self.uparams_sample,
            TableChannel::UparamsWarmup => &self.uparams_warmup,
            TableChannel::AlgoState => &self.algo,
        }
    }

    fn structured(&self, channel: StructChannel) -> &Stream {
        match channel {
            StructChannel::InvMetric => &self.metric,
            StructChannel::RunTiming => &self.timing,
        }
    }

    fn dispatcher(&self, tables: &[TableChannel], structs: &[StructChannel]) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        for &channel in tables {
            let writer = CsvWriter::new(Sink::shared(self.table(channel)));
            dispatcher.add_writer(channel, Rc::new(RefCell::new(writer)));
        }
        for &channel in structs {
            let writer = JsonWriter::new(Sink::shared(self.structured(channel)));
            dispatcher.add_writer(channel, Rc::new(RefCell::new(writer)));
        }
        dispatcher
    }
}

fn text(stream: &Stream) -> String {
    String::from_utf8(stream.borrow().clone()).unwrap()
}

fn count_matches(pattern: &str, text: &str) -> usize {
    text.matches(pattern).count()
}

fn configured_sampler(num_warmup: u64) -> AdaptDiagNuts<TestLp, rand_chacha::ChaCha8Rng> {
    let mut sampler = AdaptDiagNuts::new(TestLp, create_rng(0, 1));
    let settings = AdaptSettings {
        step_size: 1.,
        step_size_jitter: 0.,
        max_depth: 10,
        delta: 0.9,
        gamma: 0.05,
        kappa: 0.75,
        t0: 1.,
        init_buffer: 10,
        term_buffer: 2,
        window: 25,
    };
    config_adaptive_sampler(&mut sampler, &[1., 1.], &settings, num_warmup, &mut NullLogger)
        .unwrap();
    sampler
}

fn run_settings(num_warmup: u64, num_samples: u64) -> RunSettings {
    RunSettings {
        num_warmup,
        num_samples,
        num_thin: 1,
        refresh: 0,
    }
}

#[test]
fn run_separate() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = configured_sampler(37);
    let summary = run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &run_settings(37, 10),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap();
    assert_eq!(summary.iterations, 47);
    assert!(!summary.interrupted);
    drop(dispatcher);

    let metric = text(&streams.metric);
    assert!(!metric.is_empty());
    assert_eq!(count_matches("stepsize", &metric), 1);
    assert_eq!(count_matches("inv_metric", &metric), 1);
    assert_eq!(count_matches("warmup", &metric), 0);

    let timing = text(&streams.timing);
    assert!(!timing.is_empty());
    assert_eq!(count_matches("warmup", &timing), 1);
    assert_eq!(count_matches("sampling", &timing), 1);

    assert_eq!(count_matches("\n", &text(&streams.draw_warmup)), 38);
    assert_eq!(count_matches("\n", &text(&streams.draw_sample)), 11);
    assert_eq!(count_matches("\n", &text(&streams.uparams_warmup)), 38);
    assert_eq!(count_matches("\n", &text(&streams.uparams_sample)), 11);
    assert_eq!(count_matches("\n", &text(&streams.algo)), 48);
}

#[test]
fn run_some() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(
        &[TableChannel::DrawSample, TableChannel::UparamsSample],
        &[StructChannel::InvMetric],
    );
    let mut sampler = configured_sampler(37);
    let result = run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &run_settings(37, 10),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    );
    assert!(result.is_ok());
    drop(dispatcher);

    assert!(!text(&streams.metric).is_empty());
    assert!(!text(&streams.draw_sample).is_empty());
    assert!(!text(&streams.uparams_sample).is_empty());
    assert!(text(&streams.timing).is_empty());
    assert!(text(&streams.draw_warmup).is_empty());
    assert!(text(&streams.uparams_warmup).is_empty());
    assert!(text(&streams.algo).is_empty());
}

#[test]
fn headers_and_values() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = configured_sampler(37);
    run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &run_settings(37, 10),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap();
    drop(dispatcher);

    let draws = text(&streams.draw_sample);
    let uparams = text(&streams.uparams_sample);
    let algo = text(&streams.algo);
    assert_eq!(draws.lines().next(), Some("mu, sigma"));
    assert_eq!(uparams.lines().next(), Some("1, 2"));
    assert_eq!(algo.lines().next().unwrap(), STAT_NAMES.join(", "));

    for (draw, uparam) in draws.lines().skip(1).zip(uparams.lines().skip(1)) {
        let draw: Vec<f64> = draw.split(", ").map(|v| v.parse().unwrap()).collect();
        let uparam: Vec<f64> = uparam.split(", ").map(|v| v.parse().unwrap()).collect();
        assert_eq!(draw[0], uparam[0]);
        assert!((draw[1] - uparam[1].exp()).abs() < 1e-12);
    }

    let metric: serde_json::Value = serde_json::from_str(&text(&streams.metric)).unwrap();
    let step_size = metric["adaptation"]["stepsize"].as_f64().unwrap();
    assert!(step_size > 0.);
    assert_eq!(metric["adaptation"]["inv_metric"].as_array().unwrap().len(), 2);

    let timing: serde_json::Value = serde_json::from_str(&text(&streams.timing)).unwrap();
    assert!(timing["timing"]["warmup"].as_f64().unwrap() >= 0.);
    assert!(timing["timing"]["sampling"].as_f64().unwrap() >= 0.);
}

#[test]
fn same_seed_same_draws() {
    let run = || {
        let streams = Streams::default();
        let dispatcher = streams.dispatcher(&[TableChannel::DrawSample], &[]);
        let mut sampler = configured_sampler(37);
        run_adaptive_sampler(
            &mut sampler,
            &[1.5, -0.5],
            &run_settings(37, 10),
            &mut NeverInterrupt,
            &mut NullLogger,
            &dispatcher,
        )
        .unwrap();
        drop(dispatcher);
        text(&streams.draw_sample)
    };
    assert_eq!(run(), run());
}

#[test]
fn progress_and_timing_report() {
    let dispatcher = Dispatcher::new();
    let mut sampler = configured_sampler(37);
    let mut logger = Lines::default();
    let settings = RunSettings {
        refresh: 10,
        ..run_settings(37, 10)
    };
    run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &settings,
        &mut NeverInterrupt,
        &mut logger,
        &dispatcher,
    )
    .unwrap();

    let progress: Vec<&String> = logger.0.iter().filter(|l| l.starts_with("Iteration")).collect();
    assert_eq!(progress.first().unwrap().as_str(), "Iteration:  1 / 47 [  2%]  (Warmup)");
    assert_eq!(progress.last().unwrap().as_str(), "Iteration: 47 / 47 [100%]  (Sampling)");
    assert!(logger.0.iter().any(|l| l.contains("(Warm-up)")));
    assert!(logger.0.iter().any(|l| l.contains("(Total)")));
}

#[test]
fn interrupt_stops_cleanly() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = configured_sampler(37);
    let mut logger = Lines::default();
    let summary = run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &run_settings(37, 10),
        &mut CancelAfter::new(5),
        &mut logger,
        &dispatcher,
    )
    .unwrap();
    drop(dispatcher);

    assert!(summary.interrupted);
    assert_eq!(summary.iterations, 5);
    assert_eq!(count_matches("\n", &text(&streams.draw_warmup)), 6);
    assert_eq!(count_matches("\n", &text(&streams.algo)), 6);
    assert!(text(&streams.draw_sample).is_empty());
    assert!(text(&streams.metric).is_empty());
    assert!(text(&streams.timing).is_empty());
    assert!(logger.0.iter().any(|l| l.contains("interrupted")));
}

#[test]
fn interrupt_during_sampling_keeps_metric() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = configured_sampler(37);
    let summary = run_adaptive_sampler(
        &mut sampler,
        &[1.5, -0.5],
        &run_settings(37, 10),
        &mut CancelAfter::new(40),
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap();
    drop(dispatcher);

    assert!(summary.interrupted);
    assert_eq!(summary.iterations, 40);
    assert_eq!(count_matches("\n", &text(&streams.draw_sample)), 4);
    assert_eq!(count_matches("stepsize", &text(&streams.metric)), 1);
    assert!(text(&streams.timing).is_empty());
}

#[test]
fn bad_init_fails() {
    let dispatcher = Dispatcher::new();
    let mut sampler = configured_sampler(37);
    let result = run_adaptive_sampler(
        &mut sampler,
        &[f64::NAN, 0.],
        &run_settings(37, 10),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    );
    assert!(result.is_err());
}

/// A sampler whose draws count its transitions.
struct Scripted {
    calls: u64,
    fail_at: Option<u64>,
    finalized: u64,
}

impl Scripted {
    fn new(fail_at: Option<u64>) -> Self {
        Scripted {
            calls: 0,
            fail_at,
            finalized: 0,
        }
    }
}

impl AdaptiveSampler for Scripted {
    fn dim(&self) -> usize {
        1
    }

    fn param_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn stat_names(&self) -> Vec<String> {
        vec!["call".to_string()]
    }

    fn set_position(&mut self, _position: &[f64]) -> Result<(), NutsError> {
        Ok(())
    }

    fn transition(&mut self) -> Result<Draw, NutsError> {
        self.calls += 1;
        if Some(self.calls) == self.fail_at {
            return Err(NutsError::LogpFailure(Box::new(io::Error::other("boom"))));
        }
        let value = self.calls as f64;
        Ok(Draw {
            constrained: vec![value].into(),
            unconstrained: vec![value].into(),
            stats: vec![value].into(),
        })
    }

    fn finalize_adaptation(&mut self) -> Adaptation {
        self.finalized += 1;
        Adaptation {
            step_size: 0.5,
            inv_metric: vec![1.].into(),
        }
    }
}

#[test]
fn transition_failure_aborts() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = Scripted::new(Some(3));
    let err = run_adaptive_sampler(
        &mut sampler,
        &[0.],
        &run_settings(5, 5),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap_err();
    drop(dispatcher);

    assert!(err.to_string().contains("iteration 3"));
    assert!(matches!(
        err.downcast_ref::<NutsError>(),
        Some(NutsError::LogpFailure(_))
    ));
    assert_eq!(text(&streams.draw_warmup), "x\n1\n2\n");
    assert!(text(&streams.metric).is_empty());
    assert!(text(&streams.timing).is_empty());
}

#[test]
fn zero_thin_is_rejected() {
    let dispatcher = Dispatcher::new();
    let mut sampler = Scripted::new(None);
    let settings = RunSettings {
        num_thin: 0,
        ..run_settings(5, 5)
    };
    let result = run_adaptive_sampler(
        &mut sampler,
        &[0.],
        &settings,
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    );
    assert!(result.is_err());
    assert_eq!(sampler.calls, 0);
}

#[test]
fn no_warmup_still_finalizes() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = Scripted::new(None);
    run_adaptive_sampler(
        &mut sampler,
        &[0.],
        &run_settings(0, 3),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap();
    drop(dispatcher);

    assert_eq!(sampler.finalized, 1);
    assert!(text(&streams.draw_warmup).is_empty());
    assert_eq!(text(&streams.draw_sample), "x\n1\n2\n3\n");
    assert_eq!(count_matches("stepsize", &text(&streams.metric)), 1);
}

#[test]
fn no_samples_leaves_sample_tables_empty() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = Scripted::new(None);
    let summary = run_adaptive_sampler(
        &mut sampler,
        &[0.],
        &run_settings(3, 0),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap();
    drop(dispatcher);

    assert_eq!(summary.iterations, 3);
    assert_eq!(text(&streams.draw_warmup), "x\n1\n2\n3\n");
    assert!(text(&streams.draw_sample).is_empty());
    assert!(text(&streams.uparams_sample).is_empty());
    assert_eq!(count_matches("stepsize", &text(&streams.metric)), 1);
    assert_eq!(count_matches("sampling", &text(&streams.timing)), 1);
}

#[test]
fn overflowing_iteration_count_is_rejected() {
    let streams = Streams::default();
    let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
    let mut sampler = Scripted::new(None);
    let err = run_adaptive_sampler(
        &mut sampler,
        &[0.],
        &run_settings(u64::MAX, 1),
        &mut NeverInterrupt,
        &mut NullLogger,
        &dispatcher,
    )
    .unwrap_err();
    drop(dispatcher);

    assert!(err.to_string().contains("overflows"));
    assert_eq!(sampler.calls, 0);
    assert!(text(&streams.algo).is_empty());
}

proptest! {
    #[test]
    fn thinning(num_warmup in 0u64..8, num_samples in 0u64..30, num_thin in 1u64..7) {
        let streams = Streams::default();
        let dispatcher = streams.dispatcher(&TableChannel::ALL, &StructChannel::ALL);
        let mut sampler = Scripted::new(None);
        let settings = RunSettings {
            num_warmup,
            num_samples,
            num_thin,
            refresh: 0,
        };
        let summary = run_adaptive_sampler(
            &mut sampler,
            &[0.],
            &settings,
            &mut NeverInterrupt,
            &mut NullLogger,
            &dispatcher,
        )
        .unwrap();
        drop(dispatcher);

        let kept: Vec<u64> = (1..=num_samples).filter(|k| k % num_thin == 0).collect();
        let expected: String = if num_samples > 0 {
            std::iter::once("x".to_string())
                .chain(kept.iter().map(|k| (num_warmup + k).to_string()))
                .map(|line| line + "\n")
                .collect()
        } else {
            String::new()
        };
        let sample_lines = if num_samples > 0 { kept.len() + 1 } else { 0 };

        prop_assert_eq!(summary.iterations, num_warmup + num_samples);
        prop_assert_eq!(sampler.finalized, 1);
        prop_assert_eq!(text(&streams.draw_sample), expected.clone());
        prop_assert_eq!(text(&streams.uparams_sample).lines().count(), sample_lines);
        prop_assert_eq!(
            text(&streams.draw_warmup).lines().count() as u64,
            if num_warmup > 0 { num_warmup + 1 } else { 0 }
        );
        prop_assert_eq!(
            text(&streams.algo).lines().count() as u64,
            num_warmup + num_samples + 1
        );
        prop_assert_eq!(count_matches("sampling", &text(&streams.timing)), 1);
    }
}
