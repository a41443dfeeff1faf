//! A three-step signup wizard driven from the command line.
//!
//! Run with `RUST_LOG=formstep=debug cargo run --example signup_wizard` to see
//! the controller's log output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use formstep::validation::validator_fn;
use formstep::{
    MemoryFieldStore, Step, StepController, StepMessage, StepsConfig, ValidationReport,
};
use formstep_core::{AsyncRuntime, AsyncRuntimeConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "formstep=info".into()))
        .init();

    let runtime = Arc::new(AsyncRuntime::new(
        AsyncRuntimeConfig::multi_threaded()
            .with_worker_threads(1)
            .with_thread_name("signup-validation"),
    )?);

    let config = StepsConfig::new([
        Step::new("account").with_title("Account"),
        Step::new("profile").with_title("Profile"),
        Step::new("confirm").with_title("Confirm"),
    ]);
    let store = Arc::new(MemoryFieldStore::with_fields(["account", "profile", "confirm"]));

    // The email field starts empty, so the first Next is refused.
    let email_filled = Arc::new(AtomicBool::new(false));
    let email = email_filled.clone();
    let validator = validator_fn(move || {
        let filled = email.load(Ordering::Acquire);
        async move {
            if filled {
                ValidationReport::valid()
            } else {
                ValidationReport::field_error("email", "Email is required")
            }
        }
    });

    let controller = StepController::builder(config, store.clone())
        .validator(Arc::new(validator))
        .runtime(runtime.clone())
        .build()?;

    controller.bus().subscribe(|message| {
        if let StepMessage::CurrentChanged { value, previous } = message {
            println!("step {previous} -> {value}");
        }
    });
    controller.validation_failed().connect(|report| {
        for error in report.errors() {
            println!("cannot continue: {error}");
        }
    });

    controller.bus().form_initialized();
    controller.process_pending();
    print_visible(&controller, &store);

    controller.bus().next();
    runtime.block_on(controller.settle());
    controller.process_pending();
    print_visible(&controller, &store);

    email_filled.store(true, Ordering::Release);
    controller.bus().next();
    runtime.block_on(controller.settle());
    controller.process_pending();
    print_visible(&controller, &store);

    controller.bus().goto(2);
    controller.process_pending();
    print_visible(&controller, &store);

    controller.bus().previous();
    controller.process_pending();
    print_visible(&controller, &store);

    Ok(())
}

fn print_visible(controller: &StepController, store: &MemoryFieldStore) {
    let title = controller
        .current_step()
        .and_then(|step| step.title())
        .unwrap_or("(none)");
    println!(
        "current: {} [{}], visible: {:?}",
        controller.current(),
        title,
        store.displayed_fields()
    );
}
