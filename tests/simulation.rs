use std::io::Cursor;

use cachesim_msi::msi::*;
use cachesim_msi::report::Report;
use cachesim_msi::trace::TraceReader;
use cachesim_msi::{SimError, Simulation};

fn sc() -> SystemSpec {
    SystemSpec::default()
}

fn tso(buffer_capacity: usize, retire_at: usize) -> SystemSpec {
    SystemSpec {
        consistency: ConsistencyModel::TotalStoreOrder { buffer_capacity, retire_at },
        ..SystemSpec::default()
    }
}

fn run(spec: SystemSpec, trace: &str) -> Simulation {
    let mut sim = Simulation::new(spec).unwrap();
    sim.replay(TraceReader::new(Cursor::new(trace))).unwrap();
    sim
}

fn latency(sim: &Simulation, id: CacheId) -> u64 {
    sim.caches()[id].borrow().latency()
}

#[test]
fn test_write_invalidates_peer_and_keeps_written_flag() {
    let sim = run(sc(), "P0 R 5\nP0 W 5\nP1 W 5\n");

    let p0 = sim.caches()[0].borrow();
    let line = p0.line(1).unwrap();
    assert_eq!(line.tag, Some(0));
    assert_eq!(line.state, LineState::Invalid);
    assert!(line.written_to);

    let p1 = sim.caches()[1].borrow();
    assert_eq!(p1.line(1).unwrap().state, LineState::Modified);

    let r0 = sim.cache_report(0).unwrap();
    assert_eq!((r0.read_misses, r0.write_misses), (1, 1));
    assert_eq!(r0.coherence_misses, 0);
}

#[test]
fn test_single_accesses() {
    let mut sim = Simulation::new(sc()).unwrap();
    assert_eq!(sim.spec().number_processors, 4);
    assert_eq!(sim.tracker().records().len(), 4);

    let read = |processor| TraceEvent { line: 1, processor, op: Op::Read, addr: Addr::new(40) };
    assert!(!sim.access(&read(2)).unwrap().is_hit());
    assert!(sim.access(&read(2)).unwrap().is_hit());
    assert_eq!(sim.access(&read(3)).unwrap(), AccessOutcome::Miss);

    // both copies sit in the slot the geometry decodes 40 to
    let slot = sim.caches()[2].borrow().geometry().locate(Addr::new(40)).slot;
    assert_eq!(slot, 10);
    for id in [2, 3] {
        assert_eq!(sim.caches()[id].borrow().line(slot).unwrap().state, LineState::Shared);
    }

    let stats = sim.tracker().record(2).unwrap();
    assert_eq!((stats.read_hits, stats.read_misses), (1, 1));
}

#[test]
fn test_sc_latencies() {
    let sim = run(sc(), "P0 W 64\nP1 R 64\nP2 R 4096\n");
    // a write is always write-through
    assert_eq!(latency(&sim, 0), 222);
    // P0 holds 64 after its write, so the bus supplies it
    assert_eq!(latency(&sim, 1), 22);
    assert_eq!(latency(&sim, 2), 222);
    assert_eq!(latency(&sim, 3), 0);

    let l = sim.general_report().latency;
    assert_eq!(l.max_latency, 222);
    assert_eq!(l.bottleneck_cache, Some(0));
}

#[test]
fn test_address_sharing_histogram() {
    let sim = run(
        sc(),
        "P0 R 0\nP1 R 1\nP2 R 2\nP3 R 3\nP0 R 8\nP1 R 8\nP2 R 8\nP3 R 8\n",
    );
    let sharing = sim.general_report().sharing;
    assert_eq!(sharing.addresses, 5);
    assert_eq!(sharing.by_one_processor, 4);
    assert_eq!(sharing.by_two_processors, 0);
    assert_eq!(sharing.by_more_than_two_processors, 1);
}

#[test]
fn test_coherence_miss_after_remote_write() {
    let sim = run(sc(), "P0 R 20\nP1 W 20\nP0 R 20\nP0 R 20\n");
    let r0 = sim.cache_report(0).unwrap();
    assert_eq!(r0.reads, 3);
    assert_eq!(r0.read_misses, 2);
    assert_eq!(r0.coherence_misses, 1);
    // P1's modified copy was downgraded to supply P0
    assert_eq!(sim.caches()[1].borrow().line(5).unwrap().state, LineState::Shared);
}

#[test]
fn test_static_classes_partition_accesses() {
    let trace = "\
P0 R 0
P0 R 1
P1 R 0
P1 W 16
P0 R 16
P2 W 32
P2 R 32
P3 R 48
P0 W 0
P3 R 0
";
    let sim = run(sc(), trace);
    for report in sim.cache_reports() {
        assert_eq!(report.static_.total(), report.accesses, "cache {}", report.id);
        assert_eq!(report.dynamic.total(), report.accesses, "cache {}", report.id);
    }
    let general = sim.general_report();
    assert_eq!(general.accesses, 10);
    assert_eq!(general.static_.total(), 10);
    assert_eq!(general.dynamic.total(), 10);
}

#[test]
fn test_tso_drain_on_full_buffer() {
    // never reaches the retirement threshold, so everything drains
    let sim = run(tso(2, 3), "P0 W 0\nP0 W 4\nP0 W 8\n");
    assert_eq!(latency(&sim, 0), 3 * 222);

    let l = sim.general_report().latency;
    assert_eq!(l.bottleneck_cache, Some(0));
    // one drain on the full buffer, one at program end
    assert_eq!(l.write_buffer_drains, 2);
    assert_eq!(l.average_writes_drained, 1.5);
    assert_eq!(l.mean_latency_between_writes, 0.0);
    assert_eq!(sim.caches()[0].borrow().buffered_writes(), 0);
}

#[test]
fn test_tso_background_write_is_waited_for_at_end() {
    let sim = run(tso(32, 1), "P1 W 100\n");
    assert_eq!(latency(&sim, 1), 222);
    let l = sim.general_report().latency;
    assert_eq!(l.bottleneck_cache, Some(1));
    assert_eq!(l.write_buffer_drains, 1);
    assert_eq!(l.average_writes_drained, 0.0);
}

#[test]
fn test_tso_read_snoops_write_buffer() {
    let sim = run(tso(4, 4), "P0 W 12\nP0 R 12\n");
    // one cycle for the snoop, then the buffered write drains at the end
    assert_eq!(latency(&sim, 0), 1 + 222);
    assert_eq!(sim.general_report().latency.write_buffer_snoops, 1);
}

#[test]
fn test_unknown_access_type_aborts() {
    let mut sim = Simulation::new(tso(32, 32)).unwrap();
    let err = sim
        .replay(TraceReader::new(Cursor::new("P0 W 4\nP0 X 8\nP1 R 4\n")))
        .unwrap_err();
    assert!(matches!(err, SimError::UnknownAccessType { line: 2, .. }));
    // nothing after the bad line ran, and nothing was drained
    assert_eq!(sim.caches()[0].borrow().buffered_writes(), 1);
    assert_eq!(sim.cache_report(1).unwrap().accesses, 0);
}

#[test]
fn test_unknown_processor() {
    let mut sim = Simulation::new(sc()).unwrap();
    let err = sim.replay(TraceReader::new(Cursor::new("P4 R 0\n"))).unwrap_err();
    assert!(matches!(err, SimError::UnknownProcessor { line: 1, processor: 4 }));
}

#[test]
fn test_invalid_configuration() {
    let spec = SystemSpec { number_lines: 100, ..SystemSpec::default() };
    assert!(matches!(Simulation::new(spec), Err(SimError::NotPowerOfTwo { .. })));

    let spec = SystemSpec { number_processors: 0, ..SystemSpec::default() };
    assert!(matches!(Simulation::new(spec), Err(SimError::NoProcessors)));

    assert!(matches!(Simulation::new(tso(0, 1)), Err(SimError::InvalidWriteBuffer { .. })));
}

#[test]
fn test_debug_run_stays_consistent() {
    let trace = "\
P0 R 0
P1 R 0
P2 W 0
P3 R 0
P0 W 512
P1 W 512
P2 R 512
P3 W 3
P0 R 3
P1 W 0
";
    for spec in [sc(), tso(2, 1)] {
        let spec = SystemSpec { debug: true, ..spec };
        let mut sim = Simulation::new(spec).unwrap();
        assert_eq!(sim.replay(TraceReader::new(Cursor::new(trace))).unwrap(), 10);
        assert!(sim.check_consistency().is_empty());
    }
}

#[test]
fn test_report_renders_every_cache() {
    let sim = run(sc(), "P0 R 0\nP1 W 0\n");
    let caches = sim.cache_reports();
    let general = sim.general_report();
    let text = Report { caches: &caches, general: &general }.to_string();

    assert!(text.starts_with("---------------------\nSimulation Statistics\n"));
    for id in 0..4 {
        assert!(text.contains(&format!("Cache {}\n", id)));
    }
    assert!(text.contains("\tProgram latency: 222 cycles (cache 0)\n"));
    assert!(text.contains("\tWrite buffer drains: 0\n"));
}
