//! End-to-end tests for the voltaic simulation engine.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use approx::{assert_abs_diff_eq, assert_relative_eq};
use num_complex::Complex64;
use voltaic_core::analysis::{self, AnalysisConfig, SimulationResult, Snapshot};
use voltaic_core::circuit::{Circuit, CircuitBuilder, NodeId};
use voltaic_core::components::{AcSpec, DiodeParams, EvalContext, Waveform};
use voltaic_core::power::{
    Bus, BusKind, FaultConfig, FaultType, Generator, Line, PowerFlowConfig, PowerFlowMethod, PowerNetwork, Prefault,
    Transformer, WindingConnection,
};
use voltaic_core::solver::{AcConfig, AcSweep, DcConfig, DcSolver, TransientConfig};
use voltaic_core::sweep::{SweepConfig, Variation};
use voltaic_core::{RunControl, RunStatus, Session, SimError};

/// Helper: run one analysis synchronously
fn run(snapshot: impl Into<Snapshot>, config: AnalysisConfig) -> SimulationResult {
    analysis::run(&snapshot.into(), &config, &RunControl::new()).expect("analysis failed")
}

fn divider(vin: f64, r1: f64, r2: f64) -> Circuit {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "in", "0", Waveform::Dc(vin)).unwrap();
    b.add_resistor("R1", "in", "out", r1).unwrap();
    b.add_resistor("R2", "out", "0", r2).unwrap();
    b.build().unwrap()
}

fn rc_lowpass(r: f64, c: f64, source: Waveform) -> Circuit {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "in", "0", source).unwrap();
    b.add_resistor("R1", "in", "out", r).unwrap();
    b.add_capacitor("C1", "out", "0", c).unwrap();
    b.build().unwrap()
}

// ── DC ──────────────────────────────────────────────────────────

#[test]
fn test_voltage_divider_dc() {
    let result = run(divider(12.0, 3000.0, 1000.0), AnalysisConfig::Dc(DcConfig::new()));
    let op = result.as_dc().unwrap();
    assert_relative_eq!(op.node_voltage("out").unwrap(), 3.0, epsilon = 1e-9);
    assert_relative_eq!(op.node_voltage("in").unwrap(), 12.0, epsilon = 1e-9);
    // The source delivers what the resistors dissipate
    assert_relative_eq!(op.component_power("V1").unwrap(), -12.0 * 12.0 / 4000.0, epsilon = 1e-12);
    assert_abs_diff_eq!(op.power_balance(), 0.0, epsilon = 1e-12);
}

#[test]
fn test_kcl_holds_at_every_node() {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "vcc", "0", Waveform::Dc(5.0)).unwrap();
    b.add_resistor("R1", "vcc", "a", 1000.0).unwrap();
    b.add_resistor("R2", "a", "b", 2200.0).unwrap();
    b.add_resistor("R3", "b", "0", 470.0).unwrap();
    b.add_resistor("R4", "a", "0", 10_000.0).unwrap();
    b.add_diode("D1", "b", "c", DiodeParams::default()).unwrap();
    b.add_resistor("R5", "c", "0", 330.0).unwrap();
    b.add_current_source("I1", "0", "a", Waveform::Dc(1e-4), None).unwrap();
    let circuit = b.build().unwrap();

    let op = DcSolver::new(DcConfig::new()).solve(&circuit).unwrap();
    let ctx = EvalContext::dc(&op.solution, circuit.num_nodes);
    let mut net: HashMap<NodeId, f64> = HashMap::new();
    for component in &circuit.components {
        for (node, current) in component.terminal_currents(&ctx) {
            *net.entry(node).or_default() += current;
        }
    }
    for (node, total) in net {
        if !node.is_ground() {
            assert_abs_diff_eq!(total, 0.0, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_diode_forward_drop() {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "in", "0", Waveform::Dc(5.0)).unwrap();
    b.add_resistor("R1", "in", "a", 1000.0).unwrap();
    b.add_diode("D1", "a", "0", DiodeParams::default()).unwrap();
    let result = run(b.build().unwrap(), AnalysisConfig::Dc(DcConfig::new()));
    let vd = result.as_dc().unwrap().node_voltage("a").unwrap();
    assert!(vd > 0.6 && vd < 0.75, "forward drop {vd}");
}

#[test]
fn test_resolve_is_idempotent() {
    let snapshot = Snapshot::from(divider(10.0, 1000.0, 2000.0));
    let config = AnalysisConfig::Dc(DcConfig::new());
    let first = analysis::run(&snapshot, &config, &RunControl::new()).unwrap();
    let second = analysis::run(&snapshot, &config, &RunControl::new()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_floating_node_detected_before_solve() {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "in", "0", Waveform::Dc(1.0)).unwrap();
    b.add_resistor("R1", "in", "0", 1000.0).unwrap();
    b.add_capacitor("C1", "in", "island", 1e-6).unwrap();
    assert!(matches!(b.build(), Err(SimError::FloatingNode { .. })));
}

#[test]
fn test_parallel_voltage_sources_are_singular() {
    let mut b = CircuitBuilder::new();
    b.add_voltage_source("V1", "a", "0", Waveform::Dc(1.0)).unwrap();
    b.add_voltage_source("V2", "a", "0", Waveform::Dc(2.0)).unwrap();
    b.add_resistor("R1", "a", "0", 1000.0).unwrap();
    let snapshot = Snapshot::from(b.build().unwrap());
    let result = analysis::run(&snapshot, &AnalysisConfig::Dc(DcConfig::new()), &RunControl::new());
    assert!(matches!(result, Err(SimError::SingularMatrix { .. })));
}

// ── AC ──────────────────────────────────────────────────────────

#[test]
fn test_ac_failure_is_recorded_per_point() {
    // Ideal parallel LC tank driven by a current source: the tank admittance
    // vanishes at w = 1 / sqrt(LC), everywhere else the system is regular
    let mut b = CircuitBuilder::new();
    b.add_current_source("I1", "0", "a", Waveform::Dc(0.0), Some(AcSpec::unit())).unwrap();
    b.add_inductor("L1", "a", "0", 1.0).unwrap();
    b.add_capacitor("C1", "a", "0", 1.0).unwrap();

    let f0 = 1.0 / (2.0 * std::f64::consts::PI);
    let config = AcConfig::new().with_sweep(AcSweep::Linear, 0.5 * f0, 1.5 * f0, 3);
    let result = run(b.build().unwrap(), AnalysisConfig::Ac(config));
    let ac = result.as_ac().unwrap();

    assert_eq!(ac.points.len(), 3);
    let failures = ac.failures();
    assert_eq!(failures.len(), 1);
    assert_relative_eq!(failures[0].0, f0, max_relative = 1e-12);
    assert!(matches!(failures[0].1, SimError::SingularMatrix { .. }));
    assert!(ac.points[0].solution.is_ok());
    assert!(ac.points[1].solution.is_err());
    assert!(ac.points[2].solution.is_ok());

    // Below resonance the inductor dominates: |Z| = wL / (1 - w^2 LC)
    let a = ac.find_node("a").unwrap();
    let (_, v) = ac.voltage(a)[0];
    assert_relative_eq!(v.unwrap().norm(), 0.5 / 0.75, max_relative = 1e-9);
}

#[test]
fn test_rc_lowpass_response() {
    let (r, c) = (1000.0, 100e-9);
    let fc = 1.0 / (2.0 * std::f64::consts::PI * r * c);
    let mut b = CircuitBuilder::new();
    b.add_ac_voltage_source("V1", "in", "0", 0.0, AcSpec::unit()).unwrap();
    b.add_resistor("R1", "in", "out", r).unwrap();
    b.add_capacitor("C1", "out", "0", c).unwrap();

    let config = AcConfig::new().with_sweep(AcSweep::Decade, fc / 10.0, fc * 10.0, 1);
    let result = run(b.build().unwrap(), AnalysisConfig::Ac(config));
    let ac = result.as_ac().unwrap();
    let out = ac.find_node("out").unwrap();

    let points = ac.voltage(out);
    assert_eq!(points.len(), 3);
    for (f, v) in points {
        let v = v.expect("AC point failed");
        let wrc = 2.0 * std::f64::consts::PI * f * r * c;
        assert_relative_eq!(v.norm(), 1.0 / (1.0 + wrc * wrc).sqrt(), max_relative = 1e-9);
        assert_relative_eq!(v.arg(), -wrc.atan(), epsilon = 1e-9);
    }
}

// ── Transient ───────────────────────────────────────────────────

#[test]
fn test_rc_step_charging() {
    let (r, c) = (1000.0, 1e-6);
    let tau = r * c;
    let step = Waveform::Step {
        initial: 0.0,
        target: 1.0,
        delay: 0.0,
        rise: tau * 1e-4,
    };
    let circuit = rc_lowpass(r, c, step);
    let node = circuit.node("out").unwrap();
    let config = TransientConfig::new(3.0 * tau).with_initial_step(tau * 1e-5);
    let result = run(circuit, AnalysisConfig::Transient(config));
    let tr = result.as_transient().unwrap();
    let out = tr.node_voltage("out").unwrap();
    assert_abs_diff_eq!(out[0], 0.0, epsilon = 1e-12);

    let v_tau = tr.sample(node, tau).unwrap();
    assert_abs_diff_eq!(v_tau, 1.0 - (-1.0f64).exp(), epsilon = 5e-3);
    assert_abs_diff_eq!(*out.last().unwrap(), 1.0 - (-3.0f64).exp(), epsilon = 5e-3);
}

// ── Sessions ────────────────────────────────────────────────────

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_session_pause_resume_stop() {
    let (r, c) = (1000.0, 1e-6);
    let tau = r * c;
    let config = TransientConfig::new(5000.0 * tau)
        .with_initial_step(tau * 1e-3)
        .with_step_bounds(tau * 1e-9, tau / 100.0);
    let mut session = Session::new();
    let handle = session
        .submit(rc_lowpass(r, c, Waveform::Dc(1.0)), AnalysisConfig::Transient(config))
        .unwrap();

    handle.pause().unwrap();
    wait_for(|| handle.status() == RunStatus::Paused);
    let frozen = handle.progress().fraction_complete;
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.progress().fraction_complete, frozen);
    assert!(handle.result().is_none());

    handle.resume().unwrap();
    wait_for(|| handle.progress().fraction_complete > frozen || handle.status().is_terminal());

    handle.stop();
    wait_for(|| handle.status().is_terminal());
    assert_eq!(handle.status(), RunStatus::Cancelled);
    assert_eq!(handle.result(), Some(Err(SimError::Cancelled)));

    // Stop is idempotent; pause and resume are not allowed any more
    handle.stop();
    assert!(matches!(handle.pause(), Err(SimError::InvalidState { .. })));
    assert!(matches!(handle.resume(), Err(SimError::InvalidState { .. })));
}

#[test]
fn test_session_reports_validation_errors_immediately() {
    let mut session = Session::new();
    let bad = TransientConfig::new(1e-3).with_step_bounds(1e-6, 1e-9);
    assert!(matches!(
        session.submit(divider(1.0, 1.0, 1.0), AnalysisConfig::Transient(bad)),
        Err(SimError::InvalidAnalysis { .. })
    ));
}

#[test]
fn test_session_completes() {
    let mut session = Session::new();
    let handle = session
        .submit(divider(10.0, 1000.0, 1000.0), AnalysisConfig::Dc(DcConfig::new()))
        .unwrap();
    let id = handle.id();
    let result = handle.wait().unwrap();
    assert_relative_eq!(result.as_dc().unwrap().node_voltage("out").unwrap(), 5.0, epsilon = 1e-9);

    let next = session
        .submit(divider(10.0, 1000.0, 1000.0), AnalysisConfig::Dc(DcConfig::new()))
        .unwrap();
    assert_eq!(next.id(), id + 1);
    wait_for(|| next.status() == RunStatus::Completed);
    assert_eq!(next.progress().fraction_complete, 1.0);
}

// ── Sweeps ──────────────────────────────────────────────────────

#[test]
fn test_sweep_results_are_ordered_by_run_id() {
    let values: Vec<f64> = (1..=40).map(|k| 100.0 * k as f64).collect();
    let config = AnalysisConfig::Sweep(SweepConfig::new(
        AnalysisConfig::Dc(DcConfig::new()),
        Variation::parametric("R2", "resistance", values.clone()),
    ));
    let mut session = Session::new();
    let result = session.submit(divider(10.0, 1000.0, 1000.0), config).unwrap().wait().unwrap();
    let sweep = result.as_sweep().unwrap();
    assert_eq!(sweep.len(), values.len());
    for (k, point) in sweep.points.iter().enumerate() {
        assert_eq!(point.run_id, k);
        assert_eq!(point.parameters[0].value, values[k]);
        let v = point.result.as_ref().unwrap().as_dc().unwrap().node_voltage("out").unwrap();
        assert_relative_eq!(v, 10.0 * values[k] / (1000.0 + values[k]), epsilon = 1e-9);
    }
}

// ── Power systems ───────────────────────────────────────────────

fn feeder() -> PowerNetwork {
    let mut net = PowerNetwork::default();
    let gen = net.add_bus(Bus::new("GEN", BusKind::Slack, 13.8)).unwrap();
    let hv = net.add_bus(Bus::new("HV", BusKind::Pq, 138.0)).unwrap();
    let load = net.add_bus(Bus::new("LOAD", BusKind::Pq, 138.0).with_load(40.0, 15.0)).unwrap();
    net.add_generator(Generator::new("G1", gen, 0.2).with_x0(0.05)).unwrap();
    net.add_transformer(
        Transformer::new("T1", gen, hv, 0.0, 0.1).with_connection(WindingConnection::DeltaGroundedWye),
    )
    .unwrap();
    net.add_line(Line::new("L1", hv, load, 0.0, 0.2, 0.0).with_zero_sequence(0.0, 0.6))
        .unwrap();
    net
}

#[test]
fn test_power_flow_methods_agree() {
    let net = Snapshot::from(feeder());
    let nr = run(
        net.clone(),
        AnalysisConfig::PowerFlow(PowerFlowConfig::new().with_method(PowerFlowMethod::NewtonRaphson)),
    );
    let gs = run(
        net,
        AnalysisConfig::PowerFlow(PowerFlowConfig::new().with_method(PowerFlowMethod::GaussSeidel)),
    );
    let (nr, gs) = (nr.as_power_flow().unwrap(), gs.as_power_flow().unwrap());
    for (a, b) in nr.buses.iter().zip(&gs.buses) {
        assert_abs_diff_eq!(a.voltage, b.voltage, epsilon = 1e-5);
        assert_abs_diff_eq!(a.angle_deg, b.angle_deg, epsilon = 1e-3);
    }
    // Lossless branches: the slack supplies exactly the load
    assert_abs_diff_eq!(nr.bus("GEN").unwrap().p_mw, 40.0, epsilon = 1e-4);
    assert!(nr.bus("LOAD").unwrap().voltage < 1.0);
}

#[test]
fn test_three_phase_fault_current() {
    let report = run(feeder(), AnalysisConfig::Fault(FaultConfig::new("LOAD", FaultType::ThreePhase)));
    let report = report.as_fault().unwrap();
    // V / Zs with Zs = X''d + X_T + X_L
    assert_relative_eq!(report.fault_current_pu, 1.0 / 0.5, max_relative = 1e-9);
    let base = 100e3 / (3f64.sqrt() * 138.0);
    assert_relative_eq!(report.fault_current_amps, 2.0 * base, max_relative = 1e-9);
}

#[test]
fn test_single_line_to_ground_fault_with_load_flow_prefault() {
    let net = Snapshot::from(feeder());
    let flow = run(net.clone(), AnalysisConfig::PowerFlow(PowerFlowConfig::new()));
    let flow = flow.as_power_flow().unwrap();
    let vf = flow.bus("LOAD").unwrap().phasor();

    let config = FaultConfig::new("LOAD", FaultType::SingleLineToGround).with_prefault(Prefault::from(flow));
    let report = run(net, AnalysisConfig::Fault(config));
    let report = report.as_fault().unwrap();
    // Z1 = Z2 = j0.5, Z0 = j(0.1 + 0.6) through the grounded-wye winding
    let z = Complex64::new(0.0, 0.5 + 0.5 + 0.7);
    assert_relative_eq!(report.phase_currents[0].norm(), (3.0 * vf / z).norm(), max_relative = 1e-9);
    assert_abs_diff_eq!(report.bus_voltage("LOAD").unwrap().phase[0].norm(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_missing_zero_sequence_data_is_reported() {
    let mut net = PowerNetwork::default();
    let a = net.add_bus(Bus::new("A", BusKind::Slack, 13.8)).unwrap();
    let b = net.add_bus(Bus::new("B", BusKind::Pq, 13.8)).unwrap();
    net.add_generator(Generator::new("G1", a, 0.2).with_x0(0.05)).unwrap();
    net.add_line(Line::new("L1", a, b, 0.0, 0.1, 0.0)).unwrap();

    let mut session = Session::new();
    let config = AnalysisConfig::Fault(FaultConfig::new("B", FaultType::DoubleLineToGround));
    assert!(matches!(
        session.submit(net, config),
        Err(SimError::UndefinedSequenceNetwork { .. })
    ));
}

#[test]
fn test_missing_slack_bus() {
    let mut net = PowerNetwork::default();
    let a = net.add_bus(Bus::new("A", BusKind::Pq, 13.8)).unwrap();
    let b = net.add_bus(Bus::new("B", BusKind::Pq, 13.8)).unwrap();
    net.add_line(Line::new("L1", a, b, 0.01, 0.1, 0.0)).unwrap();
    let result = analysis::run(
        &net.into(),
        &AnalysisConfig::PowerFlow(PowerFlowConfig::new()),
        &RunControl::new(),
    );
    assert_eq!(result, Err(SimError::MissingSlackBus));
}
