use crate::{Cancellation, ManualSelector, Observer, detect::Detector};
#[cfg(test)]
use crate::{debug::MockObserver, detect::MockDetector};

#[macro_export]
macro_rules! transition {
    ($entity:expr, $state:expr) => {{
        $entity.state = $state;
        return Ok(());
    }};
    ($entity:expr, $state:expr, $block:block) => {{
        $block
        $entity.state = $state;
        return Ok(());
    }};
}

#[macro_export]
macro_rules! transition_if {
    ($entity:expr, $state:expr, $cond:expr) => {{
        if $cond {
            $entity.state = $state;
            return Ok(());
        }
    }};
}

#[macro_export]
macro_rules! try_some_transition {
    ($entity:expr, $state:expr, $expr:expr) => {
        match $expr {
            Some(val) => val,
            None => {
                $entity.state = $state;
                return Ok(());
            }
        }
    };
    ($entity:expr, $state:expr, $expr:expr, $block:block) => {
        match $expr {
            Some(val) => val,
            None => {
                $block
                $entity.state = $state;
                return Ok(());
            }
        }
    };
}

/// A struct containing shared resources.
#[derive(Debug)]
pub struct Resources {
    /// A resource providing image primitives.
    pub detector: Box<dyn Detector>,
    /// A resource to present intermediate results, [`None`] when running headless.
    pub observer: Option<Box<dyn Observer>>,
    /// A resource to let the user select the particle when localization fails.
    pub selector: Option<Box<dyn ManualSelector>>,
    /// A resource to stop the analysis between frame reads.
    pub cancellation: Cancellation,
}

impl Resources {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            detector,
            observer: None,
            selector: None,
            cancellation: Cancellation::default(),
        }
    }

    #[cfg(test)]
    pub fn new_test(detector: MockDetector) -> Self {
        Self::new(Box::new(detector))
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: MockObserver) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }
}
