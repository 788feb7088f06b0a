//! Anchor walkability across threads and through entry frames.

mod common;

use std::sync::Barrier;
use std::thread;

use common::*;
use prism_frames::{Frame, ThreadAnchor, WalkOptions};

#[test]
fn test_walker_observes_published_pc() {
    let h = Harness::new();
    let ctx = h.ctx();
    let storage = ThreadAnchor::new();
    let ready = Barrier::new(2);

    let last_sp = LOW + 0x800;
    h.set(last_sp - W, COMPILED_PC);

    thread::scope(|s| {
        s.spawn(|| {
            let anchor = storage.anchor();
            ready.wait();
            // Spin until the owner has captured its pc. Seeing the pc
            // implies seeing the frame it belongs to.
            while !anchor.walkable() {
                std::hint::spin_loop();
            }
            assert!(anchor.has_last_frame());
            assert_eq!(anchor.last_sp(), last_sp);
            assert_eq!(anchor.last_pc(), COMPILED_PC);
        });

        let anchor = storage.anchor();
        anchor.set_last_frame(last_sp, last_sp + 0x40);
        ready.wait();
        anchor.make_walkable(ctx.stack(), ctx.owner()).unwrap();
    });
}

#[test]
fn test_entry_sender_makes_anchor_walkable() {
    let h = Harness::new();
    let ctx = h.ctx();
    let chain = interpreted_chain(&h, 1);
    let (last_sp, last_fp) = chain.frames[0];
    h.set(last_sp - W, INTERPRETER_PC);

    let entry_sp = LOW + GUARD + W;
    let entry_fp = entry_sp + ENTRY_FRAME_WORDS * W;
    h.entry_frame(entry_fp, Some((last_sp, last_fp, 0)));
    let entry = Frame::new(&ctx, entry_sp, entry_fp, ENTRY_PC);

    let anchor = entry.entry_frame_anchor(&ctx).unwrap();
    assert!(anchor.has_last_frame());
    assert!(!anchor.walkable());

    let sender = entry.sender(&ctx, WalkOptions::default()).unwrap();
    assert_eq!(sender.pc(), INTERPRETER_PC);
    assert!(anchor.walkable());

    // A second walk reuses the captured pc.
    let again = entry.sender(&ctx, WalkOptions::default()).unwrap();
    assert!(again.same_as(&sender));
}

#[test]
fn test_concurrent_walkers_capture_once() {
    let h = Harness::new();
    let ctx = h.ctx();
    let chain = interpreted_chain(&h, 1);
    let (last_sp, last_fp) = chain.frames[0];
    h.set(last_sp - W, INTERPRETER_PC);

    let entry_sp = LOW + GUARD + W;
    let entry_fp = entry_sp + ENTRY_FRAME_WORDS * W;
    h.entry_frame(entry_fp, Some((last_sp, last_fp, 0)));
    let entry = Frame::new(&ctx, entry_sp, entry_fp, ENTRY_PC);
    assert!(!entry.entry_frame_anchor(&ctx).unwrap().walkable());

    const WALKERS: usize = 4;
    let start = Barrier::new(WALKERS);
    let senders: Vec<Frame> = thread::scope(|s| {
        let handles: Vec<_> = (0..WALKERS)
            .map(|_| {
                s.spawn(|| {
                    start.wait();
                    entry.sender(&ctx, WalkOptions::default()).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    for sender in &senders {
        assert_eq!(sender.pc(), INTERPRETER_PC);
        assert!(sender.same_as(&senders[0]));
    }
    assert_eq!(
        entry.entry_frame_anchor(&ctx).unwrap().last_pc(),
        INTERPRETER_PC
    );
}

#[test]
fn test_published_pc_never_pairs_with_older_sp() {
    const EPISODES: usize = 20_000;
    const SP_BASE: usize = LOW + 0x1000;
    const PC_BASE: usize = 0x9000_0000;
    let storage = ThreadAnchor::new();
    let start = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            let anchor = storage.anchor();
            start.wait();
            let mut seen = 0;
            while seen < EPISODES {
                let pc = anchor.last_pc();
                if pc == 0 {
                    continue;
                }
                let episode = pc - PC_BASE;
                seen = episode;
                let sp = anchor.last_sp();
                if sp != 0 {
                    // sp of episode i is SP_BASE + 16 * i.
                    assert!(
                        (sp - SP_BASE) / 16 >= episode,
                        "pc of episode {episode} seen with sp {sp:#x}"
                    );
                }
            }
        });

        let anchor = storage.anchor();
        start.wait();
        for i in 1..=EPISODES {
            anchor.set_last_frame_with_pc(SP_BASE + 16 * i, 0, PC_BASE + i);
        }
    });
}

#[test]
fn test_walkable_anchor_pc_is_not_recaptured() {
    let h = Harness::new();
    let ctx = h.ctx();
    let storage = ThreadAnchor::new();
    let anchor = storage.anchor();
    let last_sp = LOW + 0x800;
    h.set(last_sp - W, COMPILED_PC);

    anchor.set_last_frame_with_pc(last_sp, 0, RUNTIME_STUB);
    anchor.make_walkable(ctx.stack(), ctx.owner()).unwrap();
    assert_eq!(anchor.last_pc(), RUNTIME_STUB);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "anchor already walkable")]
fn test_capture_on_walkable_anchor_panics() {
    let h = Harness::new();
    let ctx = h.ctx();
    let storage = ThreadAnchor::new();
    let anchor = storage.anchor();
    let last_sp = LOW + 0x800;
    h.set(last_sp - W, COMPILED_PC);

    anchor.set_last_frame_with_pc(last_sp, 0, COMPILED_PC);
    let _ = anchor.capture_last_pc(ctx.stack());
}

#[test]
#[cfg(debug_assertions)]
fn test_make_walkable_off_owner_thread_panics() {
    let h = Harness::new();
    let ctx = h.ctx();
    let storage = ThreadAnchor::new();
    let last_sp = LOW + 0x800;
    h.set(last_sp - W, COMPILED_PC);
    storage.anchor().set_last_frame(last_sp, 0);

    let result = thread::scope(|s| {
        s.spawn(|| storage.anchor().make_walkable(ctx.stack(), ctx.owner()))
            .join()
    });
    assert!(result.is_err());
    assert!(!storage.anchor().walkable());
}
