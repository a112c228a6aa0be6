//! Voltaic - circuit and power-system simulator
//!
//! Runs built-in reference scenarios and prints their results.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=voltaic_core=debug voltaic rc-lowpass --resistance 1k --capacitance 100n
//! voltaic fault --fault-type slg
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use num_complex::Complex64;
use tracing_subscriber::EnvFilter;
use voltaic_core::{
    analysis::{AnalysisConfig, SimulationResult},
    circuit::CircuitBuilder,
    components::{AcSpec, Waveform},
    error::Result,
    power::{
        Bus, BusKind, FaultConfig, FaultType, Generator, Line, PowerFlowConfig, PowerNetwork, Prefault, RelayCurve,
        RelaySettings, Transformer, WindingConnection,
    },
    solver::{AcConfig, AcSweep, DcConfig, TransientConfig},
    Session, Snapshot,
};

/// Circuit and power-system simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,
}

#[derive(Subcommand, Debug)]
enum Scenario {
    /// DC operating point of a resistive divider
    Divider {
        /// Supply voltage (V)
        #[arg(long, default_value_t = 10.0)]
        vin: f64,
        /// Upper resistor
        #[arg(long, default_value = "1k", value_parser = parse_value)]
        r1: f64,
        /// Lower resistor
        #[arg(long, default_value = "1k", value_parser = parse_value)]
        r2: f64,
    },
    /// Frequency response of an RC low-pass filter
    RcLowpass {
        #[arg(long, default_value = "1k", value_parser = parse_value)]
        resistance: f64,
        #[arg(long, default_value = "100n", value_parser = parse_value)]
        capacitance: f64,
        /// Points per decade
        #[arg(long, default_value_t = 5)]
        points: usize,
    },
    /// Step response of an RC network
    RcStep {
        #[arg(long, default_value = "1k", value_parser = parse_value)]
        resistance: f64,
        #[arg(long, default_value = "1u", value_parser = parse_value)]
        capacitance: f64,
        /// Step amplitude (V)
        #[arg(long, default_value_t = 1.0)]
        amplitude: f64,
        /// Simulated time in time constants
        #[arg(long, default_value_t = 5.0)]
        constants: f64,
    },
    /// Load flow followed by a fault on a three-bus radial feeder
    Fault {
        #[arg(long, value_enum, default_value_t = FaultKind::ThreePhase)]
        fault_type: FaultKind,
        /// Faulted bus
        #[arg(long, default_value = "LOAD")]
        bus: String,
        /// Fault resistance (pu)
        #[arg(long, default_value_t = 0.0)]
        resistance: f64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FaultKind {
    ThreePhase,
    Slg,
    Ll,
    Dlg,
}

impl From<FaultKind> for FaultType {
    fn from(kind: FaultKind) -> Self {
        match kind {
            FaultKind::ThreePhase => FaultType::ThreePhase,
            FaultKind::Slg => FaultType::SingleLineToGround,
            FaultKind::Ll => FaultType::LineToLine,
            FaultKind::Dlg => FaultType::DoubleLineToGround,
        }
    }
}

/// Parse a value with an optional SI suffix (`4.7k`, `100n`).
fn parse_value(s: &str) -> std::result::Result<f64, String> {
    let s = s.trim();
    let (number, scale) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let scale = match c {
                'f' => 1e-15,
                'p' => 1e-12,
                'n' => 1e-9,
                'u' => 1e-6,
                'm' => 1e-3,
                'k' | 'K' => 1e3,
                'M' => 1e6,
                'G' => 1e9,
                _ => return Err(format!("unknown suffix '{c}' in '{s}'")),
            };
            (&s[..i], scale)
        }
        _ => (s, 1.0),
    };
    number
        .parse::<f64>()
        .map(|v| v * scale)
        .map_err(|e| format!("invalid number '{s}': {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut session = Session::new();

    match args.scenario {
        Scenario::Divider { vin, r1, r2 } => {
            let mut b = CircuitBuilder::new();
            b.add_voltage_source("V1", "in", "0", Waveform::Dc(vin))?;
            b.add_resistor("R1", "in", "out", r1)?;
            b.add_resistor("R2", "out", "0", r2)?;
            let result = session.submit(b.build()?, AnalysisConfig::Dc(DcConfig::new()))?.wait()?;
            print_result(&result);
        }
        Scenario::RcLowpass {
            resistance,
            capacitance,
            points,
        } => {
            let mut b = CircuitBuilder::new();
            b.add_ac_voltage_source("V1", "in", "0", 0.0, AcSpec::unit())?;
            b.add_resistor("R1", "in", "out", resistance)?;
            b.add_capacitor("C1", "out", "0", capacitance)?;
            let cutoff = 1.0 / (2.0 * std::f64::consts::PI * resistance * capacitance);
            println!("cutoff frequency: {cutoff:.3} Hz");
            let config = AcConfig::new().with_sweep(AcSweep::Decade, cutoff / 100.0, cutoff * 100.0, points);
            let result = session.submit(b.build()?, AnalysisConfig::Ac(config))?.wait()?;
            print_result(&result);
        }
        Scenario::RcStep {
            resistance,
            capacitance,
            amplitude,
            constants,
        } => {
            let tau = resistance * capacitance;
            let mut b = CircuitBuilder::new();
            let step = Waveform::Step {
                initial: 0.0,
                target: amplitude,
                delay: 0.0,
                rise: tau * 1e-3,
            };
            b.add_voltage_source("V1", "in", "0", step)?;
            b.add_resistor("R1", "in", "out", resistance)?;
            b.add_capacitor("C1", "out", "0", capacitance)?;
            let config = TransientConfig::new(constants * tau).with_initial_step(tau * 1e-4);
            let result = session.submit(b.build()?, AnalysisConfig::Transient(config))?.wait()?;
            print_result(&result);
        }
        Scenario::Fault {
            fault_type,
            bus,
            resistance,
        } => {
            let network = Snapshot::from(feeder()?);
            let flow = session
                .submit(network.clone(), AnalysisConfig::PowerFlow(PowerFlowConfig::new()))?
                .wait()?;
            print_result(&flow);
            let prefault = match &flow {
                SimulationResult::PowerFlow(pf) => Prefault::from(pf),
                _ => Prefault::Flat,
            };
            let config = FaultConfig::new(bus, fault_type.into())
                .with_impedance(Complex64::new(resistance, 0.0))
                .with_prefault(prefault)
                .with_relay(RelaySettings {
                    curve: RelayCurve::VeryInverse,
                    pickup_amps: 400.0,
                    time_multiplier: 0.2,
                });
            let result = session.submit(network, AnalysisConfig::Fault(config))?.wait()?;
            print_result(&result);
        }
    }

    Ok(())
}

/// Generator, delta/grounded-wye step-up transformer and a 138 kV line to a load.
fn feeder() -> Result<PowerNetwork> {
    let mut net = PowerNetwork::default();
    let gen = net.add_bus(Bus::new("GEN", BusKind::Slack, 13.8).with_voltage(1.02))?;
    let hv = net.add_bus(Bus::new("HV", BusKind::Pq, 138.0))?;
    let load = net.add_bus(Bus::new("LOAD", BusKind::Pq, 138.0).with_load(60.0, 25.0))?;
    net.add_generator(Generator::new("G1", gen, 0.18).with_x2(0.2).with_x0(0.06))?;
    net.add_transformer(
        Transformer::new("T1", gen, hv, 0.005, 0.08).with_connection(WindingConnection::DeltaGroundedWye),
    )?;
    net.add_line(Line::new("L1", hv, load, 0.02, 0.12, 0.04).with_zero_sequence(0.06, 0.36))?;
    Ok(net)
}

fn print_result(result: &SimulationResult) {
    match result {
        SimulationResult::Dc(op) => {
            println!("{:<12} {:>14}", "node", "voltage (V)");
            for (name, v) in op.node_names.iter().zip(&op.voltages).skip(1) {
                println!("{name:<12} {v:>14.6}");
            }
            println!("newton iterations: {}", op.iterations);
        }
        SimulationResult::Ac(ac) => {
            let Some(out) = ac.find_node("out") else {
                return;
            };
            println!("{:>14} {:>12} {:>12}", "frequency", "gain (dB)", "phase (deg)");
            for ((f, db), (_, phase)) in ac.magnitude_db(out).into_iter().zip(ac.phase_deg(out)) {
                match (db, phase) {
                    (Some(db), Some(phase)) => println!("{f:>14.3} {db:>12.3} {phase:>12.3}"),
                    _ => println!("{f:>14.3} {:>12} {:>12}", "failed", "-"),
                }
            }
        }
        SimulationResult::Transient(tr) => {
            let Some(out) = tr.node_voltage("out") else {
                return;
            };
            println!("{:>14} {:>14}", "time (s)", "v(out) (V)");
            let stride = (tr.len() / 25).max(1);
            for (k, (t, v)) in tr.times.iter().zip(&out).enumerate() {
                if k % stride == 0 || k + 1 == tr.len() {
                    println!("{t:>14.6e} {v:>14.6}");
                }
            }
            println!("accepted steps: {}, rejected: {}", tr.accepted_steps, tr.rejected_steps);
        }
        SimulationResult::PowerFlow(pf) => {
            println!("load flow ({:?}, {} iterations)", pf.method, pf.iterations);
            println!("{:<8} {:>10} {:>10} {:>10} {:>10}", "bus", "|V| (pu)", "angle", "P (MW)", "Q (MVAr)");
            for b in &pf.buses {
                println!(
                    "{:<8} {:>10.4} {:>10.3} {:>10.2} {:>10.2}",
                    b.name, b.voltage, b.angle_deg, b.p_mw, b.q_mvar
                );
            }
            println!("losses: {:.3} MW, {:.3} MVAr", pf.total_loss_mw, pf.total_loss_mvar);
        }
        SimulationResult::Fault(report) => {
            println!("{:?} fault at {}", report.fault_type, report.bus_name);
            println!(
                "fault current: {:.4} pu ({:.1} A)",
                report.fault_current_pu, report.fault_current_amps
            );
            for (phase, i) in ["a", "b", "c"].iter().zip(report.phase_currents) {
                println!("  I{phase} = {:.4} pu at {:.2} deg", i.norm(), i.arg().to_degrees());
            }
            println!("{:<8} {:>10} {:>10} {:>10}", "bus", "|Va|", "|Vb|", "|Vc|");
            for v in &report.bus_voltages {
                let [va, vb, vc] = v.phase;
                println!("{:<8} {:>10.4} {:>10.4} {:>10.4}", v.name, va.norm(), vb.norm(), vc.norm());
            }
            match report.relay_trip_time {
                Some(t) => println!("relay trips after {t:.3} s"),
                None => println!("relay does not pick up"),
            }
        }
        SimulationResult::Sweep(sweep) => {
            for point in &sweep.points {
                let status = match &point.result {
                    Ok(_) => "ok".to_string(),
                    Err(err) => err.to_string(),
                };
                println!("run {:>4}: {status}", point.run_id);
            }
        }
    }
}
