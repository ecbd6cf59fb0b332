use super::{PredictionRecord, Sample, SocIngestor};
use crate::model::{LinearFallback, SocEstimator};
use crate::stats::IngestStats;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

const POINT_SOC: f64 = 11.0;
const SEQUENCE_SOC: f64 = 77.0;

/// Answers with a fixed value per path and records every window it was handed.
#[derive(Default)]
struct RecordingEstimator {
    point_calls: AtomicUsize,
    sequence_windows: Mutex<Vec<Vec<f64>>>,
}

impl SocEstimator for RecordingEstimator {
    fn predict_point(&self, _sample: &Sample) -> f64 {
        self.point_calls.fetch_add(1, Ordering::SeqCst);
        POINT_SOC
    }

    fn predict_sequence(&self, window: &[Sample]) -> f64 {
        if let Ok(mut seen) = self.sequence_windows.lock() {
            seen.push(window.iter().map(|s| s.voltage).collect());
        }
        SEQUENCE_SOC
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Wildly out-of-range output to check the ingest path clamps on its own.
struct UnboundedEstimator;

impl SocEstimator for UnboundedEstimator {
    fn predict_point(&self, sample: &Sample) -> f64 {
        sample.voltage * 1000.0
    }

    fn predict_sequence(&self, _window: &[Sample]) -> f64 {
        -1000.0
    }

    fn name(&self) -> &'static str {
        "unbounded"
    }
}

fn volts(voltage: f64) -> Sample {
    Sample::new(voltage, -1.5, 25.0)
}

fn linear_ingestor(window: usize, history: usize) -> SocIngestor<LinearFallback> {
    SocIngestor::new(
        Arc::new(LinearFallback::default()),
        window,
        history,
        Arc::new(IngestStats::new()),
    )
}

fn recording_ingestor(window: usize, history: usize) -> SocIngestor<RecordingEstimator> {
    SocIngestor::new(
        Arc::new(RecordingEstimator::default()),
        window,
        history,
        Arc::new(IngestStats::new()),
    )
}

fn voltages(records: &[PredictionRecord]) -> Vec<f64> {
    records.iter().map(|r| r.voltage).collect()
}

#[test]
fn linear_window_of_three_scenario() {
    let ingestor = linear_ingestor(3, 200);
    let first = ingestor.observe("x", volts(3.0));
    let second = ingestor.observe("x", volts(3.6));
    let third = ingestor.observe("x", volts(4.2));

    assert_eq!(first.predicted_soc, 0.0);
    assert!((second.predicted_soc - 50.0).abs() < 1e-9);
    assert_eq!(third.predicted_soc, 100.0);
    assert_eq!(third.device_id, "x");
    assert_eq!(third.voltage, 4.2);
    assert_eq!(third.current, -1.5);
    assert_eq!(third.temperature, 25.0);

    let stats = ingestor.stats().snapshot();
    assert_eq!(stats.point_estimates, 2);
    assert_eq!(stats.sequence_estimates, 1);
}

#[test]
fn history_of_two_keeps_newest_records() {
    let ingestor = linear_ingestor(15, 2);
    let _first = ingestor.observe("d", volts(3.1));
    let second = ingestor.observe("d", volts(3.2));
    let third = ingestor.observe("d", volts(3.3));

    let history = ingestor.history("d", 100);
    assert_eq!(history, vec![second, third.clone()]);
    assert_eq!(ingestor.last("d"), Some(third));
}

#[test]
fn point_until_window_full_then_sequence() {
    let ingestor = recording_ingestor(4, 50);
    let mut socs = Vec::new();
    for step in 0..7 {
        socs.push(ingestor.observe("p", volts(step as f64)).predicted_soc);
    }
    assert_eq!(
        socs,
        vec![
            POINT_SOC,
            POINT_SOC,
            POINT_SOC,
            SEQUENCE_SOC,
            SEQUENCE_SOC,
            SEQUENCE_SOC,
            SEQUENCE_SOC
        ]
    );

    let recorder = ingestor.estimator();
    assert_eq!(recorder.point_calls.load(Ordering::SeqCst), 3);
    let windows = recorder.sequence_windows.lock().expect("lock").clone();
    assert_eq!(
        windows,
        vec![
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.0, 2.0, 3.0, 4.0],
            vec![2.0, 3.0, 4.0, 5.0],
            vec![3.0, 4.0, 5.0, 6.0],
        ]
    );
}

#[test]
fn window_is_strict_fifo_and_bounded() {
    let ingestor = linear_ingestor(3, 200);
    for step in 0..10 {
        ingestor.observe("w", volts(3.0 + step as f64 * 0.1));
        assert!(ingestor.window("w").len() <= 3);
    }
    let window: Vec<f64> = ingestor.window("w").iter().map(|s| s.voltage).collect();
    let expected = [3.7, 3.8, 3.9];
    assert_eq!(window.len(), expected.len());
    for (got, want) in window.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9);
    }
}

#[test]
fn history_limit_returns_tail_in_order() {
    let ingestor = linear_ingestor(2, 10);
    for step in 0..15 {
        ingestor.observe("t", volts(step as f64));
    }
    assert_eq!(ingestor.history("t", 100).len(), 10);
    assert_eq!(voltages(&ingestor.history("t", 3)), vec![12.0, 13.0, 14.0]);
    assert!(ingestor.history("t", 0).is_empty());
}

#[test]
fn unknown_device_has_no_data() {
    let ingestor = linear_ingestor(3, 3);
    assert!(ingestor.last("ghost").is_none());
    assert!(ingestor.history("ghost", 10).is_empty());
    assert_eq!(ingestor.device_count(), 0);
}

#[test]
fn extreme_inputs_stay_in_range() {
    let ingestor = linear_ingestor(3, 50);
    for voltage in [0.0, 10.0, -50.0, 1e9, f64::MIN_POSITIVE, 3.3] {
        let soc = ingestor.observe("e", volts(voltage)).predicted_soc;
        assert!((0.0..=100.0).contains(&soc), "soc {soc} for {voltage}");
    }

    let unbounded = SocIngestor::new(
        Arc::new(UnboundedEstimator),
        2,
        10,
        Arc::new(IngestStats::new()),
    );
    assert_eq!(unbounded.observe("u", volts(4.0)).predicted_soc, 100.0);
    assert_eq!(unbounded.observe("u", volts(4.0)).predicted_soc, 0.0);
    assert_eq!(unbounded.observe("u", volts(f64::NAN)).predicted_soc, 0.0);
}

#[test]
fn empty_batch_has_zero_mean() {
    let ingestor = linear_ingestor(3, 3);
    let result = ingestor.observe_batch("file", Vec::<Sample>::new());
    assert_eq!(result.predicted_soc, 0.0);
    assert!(result.items.is_empty());
    assert_eq!(ingestor.device_count(), 0);
}

#[test]
fn batch_mean_matches_records() {
    let ingestor = linear_ingestor(15, 200);
    let samples = [3.12, 3.24, 3.36, 3.48, 3.6].map(volts);
    let result = ingestor.observe_batch("file", samples);
    let socs: Vec<f64> = result.items.iter().map(|r| r.predicted_soc).collect();
    for (got, want) in socs.iter().zip([10.0, 20.0, 30.0, 40.0, 50.0]) {
        assert!((got - want).abs() < 1e-9);
    }
    assert!((result.predicted_soc - 30.0).abs() < 1e-9);
    assert_eq!(ingestor.history("file", 100).len(), 5);
}

#[test]
fn concurrent_same_device_loses_nothing() {
    const PER_THREAD: usize = 300;
    for history in [1000, 250] {
        let ingestor = linear_ingestor(15, history);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [1000.0, 5000.0]
            .into_iter()
            .map(|base| {
                let ingestor = ingestor.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for idx in 0..PER_THREAD {
                        ingestor.observe("shared", volts(base + idx as f64));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer panicked");
        }

        let records = ingestor.history("shared", usize::MAX);
        assert_eq!(records.len(), (2 * PER_THREAD).min(history));

        let unique: HashSet<u64> = records.iter().map(|r| r.voltage.to_bits()).collect();
        assert_eq!(unique.len(), records.len());

        // Each producer's own records must appear in the order it issued them.
        for base in [1000.0, 5000.0] {
            let mine: Vec<f64> = records
                .iter()
                .map(|r| r.voltage)
                .filter(|v| *v >= base && *v < base + PER_THREAD as f64)
                .collect();
            assert!(mine.windows(2).all(|pair| pair[0] < pair[1]));
        }
        assert_eq!(ingestor.stats().snapshot().observations, 2 * PER_THREAD as u64);
    }
}

#[test]
fn other_devices_do_not_disturb_state() {
    let run_a = |ingestor: &SocIngestor<LinearFallback>| {
        for step in 0..20 {
            ingestor.observe("A", volts(3.0 + step as f64 * 0.05));
        }
    };
    let run_b = |ingestor: &SocIngestor<LinearFallback>| {
        for step in 0..20 {
            ingestor.observe("B", volts(4.1 - step as f64 * 0.05));
        }
    };
    let fingerprint = |ingestor: &SocIngestor<LinearFallback>| {
        let window: Vec<f64> = ingestor.window("A").iter().map(|s| s.voltage).collect();
        let history: Vec<(f64, f64)> = ingestor
            .history("A", usize::MAX)
            .iter()
            .map(|r| (r.voltage, r.predicted_soc))
            .collect();
        (window, history)
    };

    let alone = linear_ingestor(5, 8);
    run_a(&alone);
    let baseline = fingerprint(&alone);

    let before = linear_ingestor(5, 8);
    run_b(&before);
    run_a(&before);
    assert_eq!(fingerprint(&before), baseline);

    let after = linear_ingestor(5, 8);
    run_a(&after);
    run_b(&after);
    assert_eq!(fingerprint(&after), baseline);

    let during = linear_ingestor(5, 8);
    let barrier = Arc::new(Barrier::new(2));
    let other = {
        let ingestor = during.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            run_b(&ingestor);
        })
    };
    barrier.wait();
    run_a(&during);
    other.join().expect("device B producer panicked");
    assert_eq!(fingerprint(&during), baseline);
    assert_eq!(during.device_count(), 2);
}
