//! Publication of readings to host entities.
//!
//! Each sink is optional; absent sinks are never called.  [`Publisher`]
//! only forwards values that changed enough to matter, so a tick that
//! produces the same readings publishes nothing.

use super::ports::StateSink;
use crate::scheduler::Readings;

/// Usage hours must move more than this to be republished.
const HOURS_EPSILON: f32 = 0.01;
/// Remaining percentage must move more than this to be republished.
const PERCENT_EPSILON: f32 = 0.1;

pub type BoxedSink<T> = Box<dyn StateSink<T>>;

/// Optional output entities.
#[derive(Default)]
pub struct Sinks {
    pub tag_present: Option<BoxedSink<bool>>,
    pub usage_hours: Option<BoxedSink<f32>>,
    pub scent_remaining: Option<BoxedSink<f32>>,
    pub fragrance_name: Option<BoxedSink<str>>,
    pub cart_id: Option<BoxedSink<str>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag_present(mut self, sink: impl StateSink<bool> + 'static) -> Self {
        self.tag_present = Some(Box::new(sink));
        self
    }

    pub fn with_usage_hours(mut self, sink: impl StateSink<f32> + 'static) -> Self {
        self.usage_hours = Some(Box::new(sink));
        self
    }

    pub fn with_scent_remaining(mut self, sink: impl StateSink<f32> + 'static) -> Self {
        self.scent_remaining = Some(Box::new(sink));
        self
    }

    pub fn with_fragrance_name(mut self, sink: impl StateSink<str> + 'static) -> Self {
        self.fragrance_name = Some(Box::new(sink));
        self
    }

    pub fn with_cart_id(mut self, sink: impl StateSink<str> + 'static) -> Self {
        self.cart_id = Some(Box::new(sink));
        self
    }
}

/// Last values handed to each sink.
#[derive(Debug, Default)]
struct Published {
    tag_present: Option<bool>,
    usage_hours: Option<f32>,
    scent_remaining: Option<f32>,
    fragrance_name: Option<heapless::String<64>>,
    cart_id: Option<heapless::String<32>>,
}

pub struct Publisher {
    sinks: Sinks,
    last: Published,
}

impl Publisher {
    pub fn new(sinks: Sinks) -> Self {
        Self {
            sinks,
            last: Published::default(),
        }
    }

    /// Push changed readings to the sinks.  Returns the number of sinks
    /// called.
    pub fn publish(&mut self, r: &Readings) -> usize {
        let mut calls = 0;

        if let Some(sink) = self.sinks.tag_present.as_mut() {
            if self.last.tag_present != Some(r.tag_present) {
                sink.publish(&r.tag_present);
                self.last.tag_present = Some(r.tag_present);
                calls += 1;
            }
        }

        // Usage figures only describe a tracked cart.
        if r.tracking.is_none() {
            return calls + self.publish_identity(r);
        }

        if let Some(sink) = self.sinks.usage_hours.as_mut() {
            if moved(self.last.usage_hours, r.usage_hours, HOURS_EPSILON) {
                sink.publish(&r.usage_hours);
                self.last.usage_hours = Some(r.usage_hours);
                calls += 1;
            }
        }

        if let Some(sink) = self.sinks.scent_remaining.as_mut() {
            if moved(self.last.scent_remaining, r.scent_remaining, PERCENT_EPSILON) {
                sink.publish(&r.scent_remaining);
                self.last.scent_remaining = Some(r.scent_remaining);
                calls += 1;
            }
        }

        calls + self.publish_identity(r)
    }

    fn publish_identity(&mut self, r: &Readings) -> usize {
        let mut calls = 0;

        if let Some(sink) = self.sinks.fragrance_name.as_mut() {
            if self.last.fragrance_name.as_deref() != Some(r.fragrance_name.as_str()) {
                sink.publish(r.fragrance_name.as_str());
                self.last.fragrance_name = Some(r.fragrance_name.clone());
                calls += 1;
            }
        }

        if let Some(sink) = self.sinks.cart_id.as_mut() {
            if self.last.cart_id.as_deref() != Some(r.cart_id.as_str()) {
                sink.publish(r.cart_id.as_str());
                self.last.cart_id = Some(r.cart_id.clone());
                calls += 1;
            }
        }

        calls
    }
}

fn moved(last: Option<f32>, now: f32, epsilon: f32) -> bool {
    last.is_none_or(|prev| (prev - now).abs() > epsilon)
}
