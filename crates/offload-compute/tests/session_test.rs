//! Session state machine tests.

use offload_compute::{
    BufferAccess, BufferId, BufferInit, BuiltinKernel, ComputeError, ComputeSession, DeviceInfo, KernelArg,
    KernelId, NdRange, ProgramId, ResourceKind, SessionStage,
};

fn pi_session(local: usize) -> (ComputeSession, KernelId, BufferId) {
    let mut s = ComputeSession::create(&DeviceInfo::host_cpu()).unwrap();
    let pi = BuiltinKernel::Pi;
    let program = s.build_program(&pi.source(), &pi.build_options(local)).unwrap();
    let kernel = s.create_kernel(program, "pi_calc").unwrap();
    let result = s.create_buffer(BufferInit::Zeroed(4), BufferAccess::WriteOnly).unwrap();
    (s, kernel, result)
}

fn bind_pi(s: &mut ComputeSession, kernel: KernelId, result: BufferId, local: usize) {
    s.set_arg(kernel, 0, KernelArg::Int(4)).unwrap();
    s.set_arg(kernel, 1, KernelArg::Int(local as i32)).unwrap();
    s.set_arg(kernel, 2, KernelArg::Local(local * 4)).unwrap();
    s.set_arg(kernel, 3, KernelArg::Buffer(result)).unwrap();
}

#[test]
fn test_full_walk() {
    let (mut s, kernel, result) = pi_session(16);
    assert_eq!(s.stage(), SessionStage::ProgramBuilt);

    bind_pi(&mut s, kernel, result, 16);
    assert_eq!(s.stage(), SessionStage::KernelArgsBound);

    s.enqueue(kernel, NdRange::Linear { global: 64, local: 16 }).unwrap();
    assert_eq!(s.stage(), SessionStage::Dispatched);

    let partials = s.read_buffer(result).unwrap();
    assert_eq!(s.stage(), SessionStage::ResultsRead);
    assert_eq!(partials.len(), 4);
    assert!(partials.iter().all(|&v| v != 0.0));

    let order = s.release().unwrap();
    assert_eq!(
        order,
        vec![
            ResourceKind::Buffer,
            ResourceKind::Queue,
            ResourceKind::Kernel,
            ResourceKind::Program,
            ResourceKind::Context,
        ]
    );
    assert_eq!(s.stage(), SessionStage::Released);
}

#[test]
fn test_enqueue_before_binding() {
    let (mut s, kernel, _) = pi_session(16);
    s.set_arg(kernel, 0, KernelArg::Int(4)).unwrap();
    let err = s.enqueue(kernel, NdRange::Linear { global: 64, local: 16 }).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::InvalidStage { required: SessionStage::KernelArgsBound, actual: SessionStage::ProgramBuilt, .. }
    ));
}

#[test]
fn test_second_kernel_unbound() {
    let (mut s, kernel, result) = pi_session(16);
    bind_pi(&mut s, kernel, result, 16);
    let program = build_pi(&mut s);
    let other = s.create_kernel(program, "pi_calc_quadrant").unwrap();
    let err = s.enqueue(other, NdRange::Linear { global: 64, local: 16 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
}

fn build_pi(s: &mut ComputeSession) -> ProgramId {
    let pi = BuiltinKernel::Pi;
    s.build_program(&pi.source(), &pi.build_options(16)).unwrap()
}

#[test]
fn test_argument_binding_errors() {
    let (mut s, kernel, result) = pi_session(16);
    let err = s.set_arg(kernel, 0, KernelArg::Float(4.0)).unwrap_err();
    assert!(matches!(err, ComputeError::ArgumentBinding { index: 0, .. }));

    let err = s.set_arg(kernel, 4, KernelArg::Int(1)).unwrap_err();
    assert!(matches!(err, ComputeError::ArgumentBinding { index: 4, .. }));

    let err = s.set_arg(kernel, 2, KernelArg::Local(0)).unwrap_err();
    assert!(matches!(err, ComputeError::ArgumentBinding { index: 2, .. }));

    s.set_arg(kernel, 3, KernelArg::Buffer(result)).unwrap();
    assert_eq!(s.stage(), SessionStage::ProgramBuilt);
}

#[test]
fn test_enqueue_validation() {
    let (mut s, kernel, result) = pi_session(16);
    bind_pi(&mut s, kernel, result, 16);

    // not a multiple of the local size
    let err = s.enqueue(kernel, NdRange::Linear { global: 60, local: 16 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");

    // wrong range shape
    let err = s.enqueue(kernel, NdRange::Grid2d { rows: 8, cols: 8 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");

    // more groups than result slots
    let err = s.enqueue(kernel, NdRange::Linear { global: 128, local: 16 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");

    // local memory too small
    s.set_arg(kernel, 2, KernelArg::Local(16)).unwrap();
    let err = s.enqueue(kernel, NdRange::Linear { global: 64, local: 16 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
}

#[test]
fn test_term_count_overflow_is_enqueue_error() {
    let (mut s, kernel, result) = pi_session(16);
    bind_pi(&mut s, kernel, result, 16);
    s.set_arg(kernel, 0, KernelArg::Int(i32::MAX)).unwrap();
    let err = s.enqueue(kernel, NdRange::Linear { global: 1 << 35, local: 16 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
    assert!(err.to_string().contains("overflows"), "{err}");
}

#[test]
fn test_program_local_size_must_match_range() {
    let (mut s, kernel, result) = pi_session(32);
    bind_pi(&mut s, kernel, result, 16);
    let err = s.enqueue(kernel, NdRange::Linear { global: 64, local: 16 }).unwrap_err();
    assert!(err.to_string().contains("LOCAL_SIZE=32"), "{err}");
}

#[test]
fn test_rotate_source_and_destination_must_differ() {
    let mut s = ComputeSession::create(&DeviceInfo::host_cpu()).unwrap();
    let rotate = BuiltinKernel::Rotate;
    let program = s.build_program(&rotate.source(), &rotate.build_options(1)).unwrap();
    let kernel = s.create_kernel(program, "rotate").unwrap();
    let buf = s.create_buffer(BufferInit::Zeroed(4), BufferAccess::ReadWrite).unwrap();
    let args = [
        KernelArg::Buffer(buf),
        KernelArg::Buffer(buf),
        KernelArg::Float(0.0),
        KernelArg::Float(1.0),
        KernelArg::Int(2),
        KernelArg::Int(2),
        KernelArg::Float(0.0),
        KernelArg::Float(0.0),
    ];
    for (i, arg) in args.into_iter().enumerate() {
        s.set_arg(kernel, i, arg).unwrap();
    }
    let err = s.enqueue(kernel, NdRange::Grid2d { rows: 2, cols: 2 }).unwrap_err();
    assert!(matches!(err, ComputeError::Enqueue(_)), "{err}");
}

#[test]
fn test_read_after_release() {
    let (mut s, kernel, result) = pi_session(16);
    bind_pi(&mut s, kernel, result, 16);
    s.enqueue(kernel, NdRange::Linear { global: 64, local: 16 }).unwrap();
    let extra = s.create_buffer(BufferInit::Filled(2, 7.0), BufferAccess::ReadOnly).unwrap();
    assert_eq!(s.read_buffer(extra).unwrap(), vec![7.0, 7.0]);
    s.release().unwrap();
    assert!(matches!(s.read_buffer(result), Err(ComputeError::Readback(_))));
}

#[test]
fn test_drop_without_release() {
    let (s, _, _) = pi_session(16);
    drop(s);
}
