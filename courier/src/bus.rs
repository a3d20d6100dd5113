//! Bus bootstrap: wiring queues, handlers and processors together.

use crate::cancellation::StructuredTaskGroup;
use crate::config::{BusConfiguration, ConfiguratorCollection};
use crate::errors::{ConfigurationError, CourierError, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::handlers::{HandlerFactory, HandlerRegistration, HandlerRegistry, HandlerResolver};
use crate::message::TransportMessage;
use crate::pipeline::{
    deferred_pipeline, receive_pipeline, Pipeline, PipelineServices, QueueSet,
};
use crate::policy::{DefaultFailurePolicy, FailurePolicy};
use crate::processing::{DeferredMessageProcessor, InboxProcessor};
use crate::queue::Queue;
use crate::serialization::{JsonSerializer, Serializer};
use crate::utils::{Clock, SystemClock, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Collects everything a [`ServiceBus`] needs.
pub struct ServiceBusBuilder {
    configuration: BusConfiguration,
    configurators: ConfiguratorCollection,
    work_queue: Option<Arc<dyn Queue>>,
    error_queue: Option<Arc<dyn Queue>>,
    deferred_queue: Option<Arc<dyn Queue>>,
    serializer: Arc<dyn Serializer>,
    failure_policy: Option<Arc<dyn FailurePolicy>>,
    resolver: Option<Arc<dyn HandlerResolver>>,
    registrations: Vec<HandlerRegistration>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
}

impl Default for ServiceBusBuilder {
    fn default() -> Self {
        Self {
            configuration: BusConfiguration::default(),
            configurators: ConfiguratorCollection::new(),
            work_queue: None,
            error_queue: None,
            deferred_queue: None,
            serializer: Arc::new(JsonSerializer::new()),
            failure_policy: None,
            resolver: None,
            registrations: Vec::new(),
            clock: Arc::new(SystemClock),
            event_sink: Arc::new(NoOpEventSink),
        }
    }
}

impl ServiceBusBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: BusConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Sets configurators applied to the configuration at build time.
    #[must_use]
    pub fn with_configurators(mut self, configurators: ConfiguratorCollection) -> Self {
        self.configurators = configurators;
        self
    }

    /// Sets the work queue. Required.
    #[must_use]
    pub fn with_work_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.work_queue = Some(queue);
        self
    }

    /// Sets the error queue. Required.
    #[must_use]
    pub fn with_error_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.error_queue = Some(queue);
        self
    }

    /// Sets the deferred queue and enables the deferred processor.
    #[must_use]
    pub fn with_deferred_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.deferred_queue = Some(queue);
        self
    }

    /// Sets the serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Overrides the failure policy built from the configuration.
    #[must_use]
    pub fn with_failure_policy(mut self, failure_policy: Arc<dyn FailurePolicy>) -> Self {
        self.failure_policy = Some(failure_policy);
        self
    }

    /// Overrides the default registration-map resolver.
    #[must_use]
    pub fn with_handler_resolver(mut self, resolver: Arc<dyn HandlerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Adds a handler registration.
    #[must_use]
    pub fn with_handler(mut self, registration: HandlerRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Applies configurators, validates and wires the bus.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing work or error queue, an
    /// invalid configuration or a duplicate handler registration.
    pub fn build(self) -> Result<ServiceBus> {
        let mut configuration = self.configuration;
        self.configurators.apply(&mut configuration)?;
        configuration.validate()?;

        let work = self
            .work_queue
            .ok_or(ConfigurationError::MissingQueue("work"))?;
        let error = self
            .error_queue
            .ok_or(ConfigurationError::MissingQueue("error"))?;
        let mut queues = QueueSet::new(work, error);
        if let Some(deferred) = self.deferred_queue {
            queues = queues.with_deferred(deferred);
        }

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(HandlerRegistry::new()));
        let factory = Arc::new(HandlerFactory::new(resolver));
        let registered = factory.register_handlers(&self.registrations)?;
        debug!(registered, "Registered message handlers");

        let failure_policy = self.failure_policy.unwrap_or_else(|| {
            Arc::new(DefaultFailurePolicy::from_configuration(&configuration))
        });

        let mut services = PipelineServices::new(Arc::clone(&factory))
            .with_serializer(Arc::clone(&self.serializer))
            .with_failure_policy(failure_policy)
            .with_clock(Arc::clone(&self.clock))
            .with_event_sink(self.event_sink)
            .with_remove_messages_not_handled(configuration.remove_messages_not_handled);

        let deferred_processor = queues.deferred.is_some().then(|| {
            Arc::new(
                DeferredMessageProcessor::new(
                    deferred_pipeline(&services),
                    queues.clone(),
                    configuration.maximum_failure_count,
                    Arc::clone(&self.clock),
                )
                .with_poll_interval(configuration.deferred_poll_interval()),
            )
        });
        if let Some(processor) = &deferred_processor {
            services = services.with_deferral_listener(processor.clone());
        }

        Ok(ServiceBus {
            receive_pipeline: Arc::new(receive_pipeline(&services)),
            configuration,
            queues,
            serializer: self.serializer,
            factory,
            deferred_processor,
            tasks: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for ServiceBusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBusBuilder")
            .field("configuration", &self.configuration)
            .field("configurators", &self.configurators)
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

/// A configured bus: inbox workers plus the deferred processor.
pub struct ServiceBus {
    configuration: BusConfiguration,
    queues: QueueSet,
    serializer: Arc<dyn Serializer>,
    factory: Arc<HandlerFactory>,
    receive_pipeline: Arc<Pipeline>,
    deferred_processor: Option<Arc<DeferredMessageProcessor>>,
    tasks: Mutex<Option<StructuredTaskGroup>>,
}

impl ServiceBus {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ServiceBusBuilder {
        ServiceBusBuilder::new()
    }

    /// The effective configuration, after configurators ran.
    #[must_use]
    pub const fn configuration(&self) -> &BusConfiguration {
        &self.configuration
    }

    /// The handler factory shared by the inbox workers.
    #[must_use]
    pub const fn handler_factory(&self) -> &Arc<HandlerFactory> {
        &self.factory
    }

    /// The deferred processor, when a deferred queue is configured.
    #[must_use]
    pub const fn deferred_processor(&self) -> Option<&Arc<DeferredMessageProcessor>> {
        self.deferred_processor.as_ref()
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Spawns the inbox workers and the deferred processor.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is already running.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(CourierError::Internal("the bus is already running".to_string()));
        }

        let group = StructuredTaskGroup::new();
        for worker in 0..self.configuration.thread_count {
            let inbox = InboxProcessor::new(
                Arc::clone(&self.receive_pipeline),
                self.queues.clone(),
                self.configuration.maximum_failure_count,
                self.configuration.idle_durations(),
            );
            group.spawn(format!("inbox-{worker}"), move |cancel| async move {
                inbox.run(worker, &cancel).await;
                Ok(())
            });
        }

        if let Some(processor) = &self.deferred_processor {
            let processor = Arc::clone(processor);
            group.spawn("deferred", move |cancel| async move {
                processor.run(&cancel).await;
                Ok(())
            });
        }

        info!(
            workers = self.configuration.thread_count,
            work_queue = self.queues.work.uri(),
            deferred = self.deferred_processor.is_some(),
            "Service bus started"
        );
        *tasks = Some(group);
        Ok(())
    }

    /// Signals every worker to stop and waits for them.
    ///
    /// Runs in progress finish first. Stopping a bus that is not running does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns the first worker failure.
    pub async fn stop(&self) -> Result<()> {
        let Some(group) = self.tasks.lock().take() else {
            return Ok(());
        };
        group.cancel_all("service bus stopping");
        let result = group.wait().await;
        info!("Service bus stopped");
        result
    }

    /// Serializes a message onto the work queue.
    ///
    /// # Errors
    ///
    /// Returns a serialization or queue error.
    pub async fn send(&self, message: &TransportMessage) -> Result<()> {
        let stream = self.serializer.serialize(message)?;
        self.queues.work.enqueue(message.message_id, stream).await?;
        debug!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            "Message sent"
        );
        Ok(())
    }

    /// Tells the deferred processor that a message due at `ignore_till` was
    /// parked. Ignored without a deferred queue.
    pub fn message_deferred(&self, ignore_till: Timestamp) {
        if let Some(processor) = &self.deferred_processor {
            processor.message_deferred(ignore_till);
        }
    }
}

impl std::fmt::Debug for ServiceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBus")
            .field("configuration", &self.configuration)
            .field("queues", &self.queues)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
