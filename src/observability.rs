use biometrics::{Collector, Counter, Moments};

pub(crate) static STORE_WRITES: Counter = Counter::new("confab.store.writes");
pub(crate) static STORE_ERRORS: Counter = Counter::new("confab.store.errors");
pub(crate) static STORE_SYSTEM_MESSAGES_CLEANED: Counter =
    Counter::new("confab.store.system_messages_cleaned");

pub(crate) static COMPLETION_REQUESTS: Counter = Counter::new("confab.completion.requests");
pub(crate) static COMPLETION_ERRORS: Counter = Counter::new("confab.completion.errors");
pub(crate) static COMPLETION_DURATION: Moments =
    Moments::new("confab.completion.duration_seconds");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("confab.stream.fragments");
pub(crate) static STREAM_INTERRUPTS: Counter = Counter::new("confab.stream.interrupts");

pub(crate) static SESSION_TURNS: Counter = Counter::new("confab.session.turns");
pub(crate) static SESSION_PERSONA_REWRITES: Counter =
    Counter::new("confab.session.persona_rewrites");
pub(crate) static CONFIG_FALLBACKS: Counter = Counter::new("confab.config.fallbacks");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&STORE_WRITES);
    collector.register_counter(&STORE_ERRORS);
    collector.register_counter(&STORE_SYSTEM_MESSAGES_CLEANED);

    collector.register_counter(&COMPLETION_REQUESTS);
    collector.register_counter(&COMPLETION_ERRORS);
    collector.register_moments(&COMPLETION_DURATION);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_INTERRUPTS);

    collector.register_counter(&SESSION_TURNS);
    collector.register_counter(&SESSION_PERSONA_REWRITES);
    collector.register_counter(&CONFIG_FALLBACKS);
}
