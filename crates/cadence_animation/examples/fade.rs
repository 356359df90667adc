//! Fade Demo
//!
//! Three animators with different easings share one context and one timer.
//! A host loop pumps the context and prints a bar per update.
//!
//! Run with: cargo run -p cadence_animation --example fade
//! More detail: RUST_LOG=cadence_animation=trace cargo run -p cadence_animation --example fade

use std::time::Duration;

use cadence_animation::{Animator, AnimatorEvent, Easing};
use cadence_core::{LoopContext, Result};

fn bar(progress: f64) -> String {
    let filled = (progress * 30.0).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(30 - filled.min(30)))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let (event_loop, _guard) = LoopContext::new_entered();

    let curves = [
        ("linear", Easing::Linear),
        ("ease-in-out", Easing::EaseInOut),
        ("ease-out-cubic", Easing::EaseOutCubic),
    ];

    let mut animators = Vec::new();
    for (index, (name, easing)) in curves.into_iter().enumerate() {
        let animator = Animator::new()?;
        animator.set_delay(Duration::from_millis(index as u64 * 150))?;
        animator.set_duration(Duration::from_millis(600))?;
        animator.set_interval(Duration::from_millis(50))?;
        animator.set_easing(easing)?;
        animator.subscribe(move |event| match event {
            AnimatorEvent::ProgressChanged(progress) => {
                println!("{:>15} {} {:.2}", name, bar(progress), progress);
            }
            AnimatorEvent::Completed => println!("{:>15} done", name),
            AnimatorEvent::Cancelled => println!("{:>15} cancelled", name),
        })?;
        animator.start()?;
        animators.push(animator);
    }

    let finished = event_loop.run_until(Duration::from_secs(5), || {
        animators
            .iter()
            .all(|animator| !animator.is_started().unwrap_or(false))
    })?;

    let stats = animators[0].scheduler().stats();
    tracing::info!(
        "finished: {}, driver re-armed {} times for {} animators",
        finished,
        stats.rearms,
        stats.registered
    );
    Ok(())
}
