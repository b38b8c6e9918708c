//! Pi reduction tests on the host devices.

use approx::assert_relative_eq;
use offload_compute::pi::{host_reduce, reference_partial_sums};
use offload_compute::pipeline::estimate_pi;
use offload_compute::{
    BuiltinKernel, ComputeError, DeviceInfo, DeviceKind, PiConfig, ProgramSource, TermSeries, WorkGrid,
    precompile,
};

#[test]
fn test_scenario_four_groups_of_sixteen() {
    let config = PiConfig::default().compute_units(4).local_size(16).floats_per_item(4);
    let run = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap();

    assert_eq!(run.grid.global_size, 64);
    assert_eq!(run.grid.buckets(), 4);
    assert_eq!(run.estimate.partials.len(), 4);

    let sum = host_reduce(&run.estimate.partials);
    assert_eq!(run.estimate.sum, sum);
    assert_eq!(run.estimate.pi, sum * 4.0);
    assert!(run.estimate.error() < 5e-3, "pi = {}", run.estimate.pi);
}

#[test]
fn test_partials_bit_identical_to_reference() {
    let cases = [(1u32, 1usize, 1usize), (3, 7, 5), (8, 64, 16), (2, 256, 3), (5, 16, 1)];
    for series in [TermSeries::Leibniz, TermSeries::QuarterCircle] {
        for (cu, local, fpi) in cases {
            let config = PiConfig::default()
                .series(series)
                .compute_units(cu)
                .local_size(local)
                .floats_per_item(fpi);
            let run = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap();
            let grid = WorkGrid::from_capabilities(cu, local).unwrap();
            let expected = reference_partial_sums(series, &grid, fpi).unwrap();
            assert_eq!(run.estimate.partials, expected, "{series:?} cu={cu} local={local} fpi={fpi}");
        }
    }
}

#[test]
fn test_rerun_is_bit_identical() {
    let config = PiConfig::default().compute_units(6).local_size(32).floats_per_item(7);
    let a = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap();
    let b = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap();
    assert_eq!(a.estimate, b.estimate);
}

#[test]
fn test_quarter_circle_is_accurate() {
    let config = PiConfig::default()
        .series(TermSeries::QuarterCircle)
        .compute_units(16)
        .local_size(64)
        .floats_per_item(8);
    let run = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap();
    assert_relative_eq!(run.estimate.pi, std::f32::consts::PI, epsilon = 1e-3);
}

#[test]
fn test_local_size_above_device_max_rejected() {
    let config = PiConfig::default().local_size(4096);
    let err = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap_err();
    assert!(matches!(err, ComputeError::InvalidGrid(_)), "{err}");
}

#[test]
fn test_term_count_overflow_rejected_before_dispatch() {
    let config = PiConfig::default()
        .compute_units(1 << 26)
        .local_size(256)
        .floats_per_item(i32::MAX as usize);
    let err = estimate_pi(&DeviceInfo::host_cpu(), &config).unwrap_err();
    assert!(matches!(err, ComputeError::InvalidGrid(_)), "{err}");
}

#[test]
fn test_accelerator_runs_precompiled_binary() {
    let acc = DeviceInfo::accelerator_emulator();
    let pi = BuiltinKernel::Pi;
    let bytes = precompile(&pi.source(), DeviceKind::Accelerator, &pi.build_options(16)).unwrap();

    let config = PiConfig::default().program(ProgramSource::binary("pi_calc.ofkb", bytes));
    let run = estimate_pi(&acc, &config).unwrap();

    let grid = WorkGrid::from_capabilities(acc.compute_units, 16).unwrap();
    assert_eq!(run.grid, grid);
    assert_eq!(run.estimate.partials, reference_partial_sums(TermSeries::Leibniz, &grid, 4).unwrap());
}

#[test]
fn test_accelerator_rejects_source() {
    let err = estimate_pi(&DeviceInfo::accelerator_emulator(), &PiConfig::default()).unwrap_err();
    assert!(matches!(err, ComputeError::ProgramBuild(_)), "{err}");
}

#[test]
fn test_binary_built_for_other_local_size() {
    let pi = BuiltinKernel::Pi;
    let bytes = precompile(&pi.source(), DeviceKind::Accelerator, &pi.build_options(32)).unwrap();
    let config = PiConfig::default().program(ProgramSource::binary("pi32.ofkb", bytes));
    let err = estimate_pi(&DeviceInfo::accelerator_emulator(), &config).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
}

#[test]
fn test_binary_for_wrong_device_kind() {
    let pi = BuiltinKernel::Pi;
    let bytes = precompile(&pi.source(), DeviceKind::Gpu, &pi.build_options(16)).unwrap();
    let config = PiConfig::default().program(ProgramSource::binary("gpu.ofkb", bytes));
    let err = estimate_pi(&DeviceInfo::accelerator_emulator(), &config).unwrap_err();
    assert!(matches!(err, ComputeError::ProgramBuild(_)), "{err}");
}
