//! Pre-finalization guard and post-finalization shared invocation.

use std::{
    sync::{mpsc, Arc, Barrier},
    thread,
};

use ilforge_core::{Op, ValueType};
use ilforge_emit::{AssemblyPhase, Error, MethodAttributes, Session, SessionOptions, TypeAttributes};
use ilforge_runtime::{Binder, Emitter};

#[test]
fn emission_while_another_thread_holds_the_session_is_rejected() {
    let session = Session::new("A", SessionOptions::default());
    let ty = session.define_type(session.default_module(), "T", TypeAttributes::STATIC_CONTAINER).unwrap();
    let m = session
        .define_method(ty, "M", MethodAttributes::PUBLIC | MethodAttributes::STATIC, ValueType::I32, &[])
        .unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        let shared = &session;
        let holder = scope.spawn(move || {
            shared.with_il(m, |il| {
                il.emit(Op::LdcI4(1));
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                il.emit(Op::Ret);
            })
        });

        entered_rx.recv().unwrap();
        assert!(matches!(session.emit(m, Op::Nop), Err(Error::ConcurrentMutation)));
        assert!(matches!(session.finalize(), Err(Error::ConcurrentMutation)));
        release_tx.send(()).unwrap();
        holder.join().unwrap().unwrap();
    });

    session.close(m).unwrap();
    let desc = session.finalize_type(ty).unwrap();
    assert_eq!(desc.methods()[0].body().ops(), &[Op::LdcI4(1), Op::Ret]);
}

#[test]
fn finalized_handles_are_invoked_concurrently() {
    let emitter = Emitter::new("A");
    let square = emitter
        .emit_method::<i64, i64>("Math.Ops", "Square", |il| {
            il.emit(Op::Ldarg(0)).emit(Op::Dup).emit(Op::Mul).emit(Op::Ret);
        })
        .unwrap();
    let asm = emitter.finish().unwrap();
    let ty = asm.find_type("Math.Ops").unwrap();

    const THREADS: usize = 8;
    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        for t in 0..THREADS {
            let square = square.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                // a second handle to the same descriptor, bound from this thread
                let again = Binder::new().bind::<i64, i64>(ty, "Square").unwrap();
                barrier.wait();
                for i in 0..1_000i64 {
                    let x = i + t as i64;
                    assert_eq!(square.invoke(x), x * x);
                    assert_eq!(again.invoke(x), x * x);
                }
            });
        }
    });
}

#[cfg(unix)]
#[test]
fn finalized_reads_proceed_while_persist_blocks_on_io() {
    use std::io::Read;

    let dir = tempfile::tempdir().unwrap();
    let pipe = dir.path().join("image.pipe");
    assert!(std::process::Command::new("mkfifo").arg(&pipe).status().unwrap().success());

    // larger than a pipe buffer, so the writer stays blocked until drained
    let blob = "x".repeat(256 * 1024);
    let emitter = Emitter::new("A");
    emitter
        .emit_method::<(), String>("Big.Blob", "Get", |il| {
            il.emit(Op::LdStr(blob.clone())).emit(Op::Ret);
        })
        .unwrap();
    let asm = emitter.finish().unwrap();
    let session = emitter.session();

    thread::scope(|scope| {
        let writer = scope.spawn(|| session.persist(&pipe));
        // returns once the writer has opened its end
        let mut reader = std::fs::File::open(&pipe).unwrap();

        assert!(Arc::ptr_eq(&session.assembly().unwrap(), &asm));
        assert_eq!(session.phase(), AssemblyPhase::Finalized);
        let ty = asm.find_type("Big.Blob").unwrap();
        let get = Binder::new().bind::<(), String>(ty, "Get").unwrap();
        assert_eq!(get.invoke(()).len(), blob.len());
        assert!(matches!(session.persist(dir.path().join("other.ilimg")), Err(Error::ConcurrentMutation)));

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        writer.join().unwrap().unwrap();
        assert!(bytes.starts_with(b"ILIMG"));
    });
    assert_eq!(session.phase(), AssemblyPhase::Persisted);
}
