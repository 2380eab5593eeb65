use std::{
    os::fd::OwnedFd,
    sync::{Arc, Mutex, Weak, atomic::Ordering},
};

use processor::{
    ModuleEvaluation, ProcessorRegistration, WorkletEvents, WorkletHost, WorkletHostInit,
    WorkletModule, WorkletNodeDefinition, WorkletPortBinding,
};
use util::{PublishSlot, Published, collections::Map};

use crate::{Session, Task, config::MAILBOX_CAPACITY, notify::Mailbox, session::lock};

pub(crate) struct WorkletHostHandle(pub Arc<dyn WorkletHost>);

impl Published for WorkletHostHandle {}

type Callback<T> = Box<dyn FnMut(T) + Send>;

#[derive(Default)]
struct Callbacks {
    processor_error: Option<Callback<u64>>,
    processor_registered: Option<Callback<ProcessorRegistration>>,
    module_evaluated: Option<Callback<ModuleEvaluation>>,
}

pub(crate) struct WorkletState {
    pub host: PublishSlot<WorkletHostHandle>,
    modules: Mutex<Vec<WorkletModule>>,
    definitions: Mutex<Vec<WorkletNodeDefinition>>,
    ports: Mutex<Map<u64, OwnedFd>>,
    errors: Mailbox<u64>,
    registrations: Mailbox<ProcessorRegistration>,
    evaluations: Mailbox<ModuleEvaluation>,
    callbacks: Mutex<Callbacks>,
}

impl Default for WorkletState {
    fn default() -> Self {
        Self {
            host: PublishSlot::default(),
            modules: Mutex::default(),
            definitions: Mutex::default(),
            ports: Mutex::default(),
            errors: Mailbox::new(MAILBOX_CAPACITY),
            registrations: Mailbox::new(MAILBOX_CAPACITY),
            evaluations: Mailbox::new(MAILBOX_CAPACITY),
            callbacks: Mutex::default(),
        }
    }
}

struct SessionEvents {
    session: Weak<Session>,
}

fn post<T>(session: &Session, mailbox: &Mailbox<T>, item: T, task: Task) {
    match mailbox.try_push(item) {
        Ok(true) => {
            if !session.schedule(task) {
                mailbox.unschedule();
            }
        }
        Ok(false) => (),
        Err(_) => {
            if session.debug.info {
                log::debug!("session {}: {task:?} mailbox is full", session.session_id());
            }
        }
    }
}

impl WorkletEvents for SessionEvents {
    fn processor_error(&self, node_id: u64) {
        if let Some(session) = self.session.upgrade() {
            post(
                &session,
                &session.worklet.errors,
                node_id,
                Task::FlushProcessorErrors,
            );
        }
    }

    fn processor_registered(&self, registration: ProcessorRegistration) {
        if let Some(session) = self.session.upgrade() {
            post(
                &session,
                &session.worklet.registrations,
                registration,
                Task::FlushProcessorRegistrations,
            );
        }
    }

    fn module_evaluated(&self, evaluation: ModuleEvaluation) {
        if let Some(session) = self.session.upgrade() {
            post(
                &session,
                &session.worklet.evaluations,
                evaluation,
                Task::FlushModuleEvaluations,
            );
        }
    }
}

fn duplicate_ports(ports: &Map<u64, OwnedFd>) -> Vec<WorkletPortBinding> {
    let mut bindings = ports
        .iter()
        .filter_map(|(node_id, fd)| match fd.try_clone() {
            Ok(processor_port) => Some(WorkletPortBinding {
                node_id: *node_id,
                processor_port,
            }),
            Err(error) => {
                log::warn!("could not duplicate worklet port of node {node_id}: {error}");
                None
            }
        })
        .collect::<Vec<_>>();
    bindings.sort_by_key(|binding| binding.node_id);
    bindings
}

impl Session {
    fn worklet_host(&self) -> Option<Arc<dyn WorkletHost>> {
        self.worklet.host.load().map(|handle| handle.0.clone())
    }

    /// Store a module and hand it to the host, creating the host if needed.
    pub fn add_worklet_module(&self, module: WorkletModule) {
        if self.is_shut_down() {
            return;
        }
        lock(&self.worklet.modules).push(module.clone());
        match self.worklet_host() {
            Some(host) => host.enqueue_module(module),
            None => {
                self.ensure_worklet_host();
            }
        }
    }

    pub fn set_worklet_node_definitions(&self, definitions: Vec<WorkletNodeDefinition>) {
        if self.is_shut_down() {
            return;
        }
        *lock(&self.worklet.definitions) = definitions.clone();
        match self.worklet_host() {
            Some(host) => host.synchronize_node_definitions(&definitions),
            None => {
                self.ensure_worklet_host();
            }
        }
    }

    /// Keep a duplicate of each port descriptor, closing the ones held before, and pass the
    /// bindings on to the host.
    pub fn set_worklet_node_ports(&self, ports: Vec<WorkletPortBinding>) {
        if self.is_shut_down() {
            return;
        }
        let mut duplicates = Map::default();
        for binding in &ports {
            match binding.processor_port.try_clone() {
                Ok(fd) => {
                    duplicates.insert(binding.node_id, fd);
                }
                Err(error) => log::warn!(
                    "session {}: could not duplicate worklet port of node {}: {error}",
                    self.session_id(),
                    binding.node_id
                ),
            }
        }
        *lock(&self.worklet.ports) = duplicates;
        match self.worklet_host() {
            Some(host) => host.enqueue_port_bindings(ports),
            None => {
                self.ensure_worklet_host();
            }
        }
    }

    /// Create the worklet host if there is work for it. Returns `true` if a host exists
    /// afterwards.
    pub fn ensure_worklet_host(&self) -> bool {
        if !self.worklet.host.is_empty() {
            return true;
        }
        if self.is_shut_down() {
            return false;
        }
        let modules = lock(&self.worklet.modules).clone();
        let node_definitions = lock(&self.worklet.definitions).clone();
        let port_bindings = duplicate_ports(&lock(&self.worklet.ports));
        if modules.is_empty() && node_definitions.is_empty() && port_bindings.is_empty() {
            return false;
        }
        let Some(factory) = &self.collaborators.worklet_host_factory else {
            log::debug!("session {}: no worklet host factory", self.session_id());
            return false;
        };

        let init = WorkletHostInit {
            sample_rate: self.context_sample_rate.load(Ordering::Acquire) as f32,
            rendered_frames: self.rendered_frames(),
            modules,
            node_definitions,
            port_bindings,
            events: Arc::new(SessionEvents {
                session: self.this.clone(),
            }),
        };
        match factory.create(init) {
            Ok(host) => {
                if self.debug.info {
                    log::info!("session {}: worklet host created", self.session_id());
                }
                self.worklet
                    .host
                    .publish(Some(Arc::new(WorkletHostHandle(host))))
                    .release();
                true
            }
            Err(error) => {
                log::warn!(
                    "session {}: could not create worklet host: {error}",
                    self.session_id()
                );
                false
            }
        }
    }

    pub fn has_worklet_host(&self) -> bool {
        !self.worklet.host.is_empty()
    }

    pub(crate) fn clear_worklet_host(&self) {
        self.worklet.host.publish(None).release();
    }

    pub(crate) fn close_worklet_ports(&self) {
        lock(&self.worklet.ports).clear();
    }

    pub(crate) fn clear_worklet_modules(&self) {
        lock(&self.worklet.modules).clear();
        lock(&self.worklet.definitions).clear();
    }

    /// Number of port descriptors the session holds.
    pub fn worklet_port_count(&self) -> usize {
        lock(&self.worklet.ports).len()
    }

    /// Called on the control thread with the node id of each processor that failed.
    pub fn on_processor_error(&self, callback: impl FnMut(u64) + Send + 'static) {
        lock(&self.worklet.callbacks).processor_error = Some(Box::new(callback));
        self.flush_processor_errors();
    }

    pub fn on_processor_registered(
        &self,
        callback: impl FnMut(ProcessorRegistration) + Send + 'static,
    ) {
        lock(&self.worklet.callbacks).processor_registered = Some(Box::new(callback));
        self.flush_processor_registrations();
    }

    pub fn on_module_evaluated(&self, callback: impl FnMut(ModuleEvaluation) + Send + 'static) {
        lock(&self.worklet.callbacks).module_evaluated = Some(Box::new(callback));
        self.flush_module_evaluations();
    }

    pub(crate) fn flush_processor_errors(&self) {
        self.flush(
            &self.worklet.errors,
            |callbacks| &mut callbacks.processor_error,
            Task::FlushProcessorErrors,
        );
    }

    pub(crate) fn flush_processor_registrations(&self) {
        self.flush(
            &self.worklet.registrations,
            |callbacks| &mut callbacks.processor_registered,
            Task::FlushProcessorRegistrations,
        );
    }

    pub(crate) fn flush_module_evaluations(&self) {
        self.flush(
            &self.worklet.evaluations,
            |callbacks| &mut callbacks.module_evaluated,
            Task::FlushModuleEvaluations,
        );
    }

    fn flush<T>(
        &self,
        mailbox: &Mailbox<T>,
        select: impl Fn(&mut Callbacks) -> &mut Option<Callback<T>>,
        task: Task,
    ) {
        let Some(mut callback) = select(&mut lock(&self.worklet.callbacks)).take() else {
            mailbox.unschedule();
            return;
        };
        let reschedule = mailbox.flush(&mut callback);
        {
            let mut callbacks = lock(&self.worklet.callbacks);
            let slot = select(&mut callbacks);
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
        if reschedule && !self.schedule(task) {
            mailbox.unschedule();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::testing::{Fixture, TestWorkletFactory};
    use processor::{WorkletEvents, WorkletModule};

    #[test]
    fn host_is_created_on_first_module() {
        let factory = Arc::new(TestWorkletFactory::default());
        let fixture = Fixture::builder().worklet(factory.clone()).build();
        let session = &fixture.session;

        assert!(!session.ensure_worklet_host());
        assert_eq!(factory.created(), 0);

        session.add_worklet_module(WorkletModule {
            module_id: 1,
            url: "noise.js".into(),
            source_text: String::new(),
        });
        assert!(session.has_worklet_host());
        assert_eq!(factory.created(), 1);
        let Some(host) = factory.host() else {
            panic!("no host");
        };
        assert_eq!(host.initial_modules(), 1);

        session.add_worklet_module(WorkletModule {
            module_id: 2,
            url: "gain.js".into(),
            source_text: String::new(),
        });
        assert_eq!(factory.created(), 1);
        assert_eq!(host.enqueued_modules(), 1);
    }

    #[test]
    fn ports_are_duplicated_and_closed() {
        let factory = Arc::new(TestWorkletFactory::default());
        let fixture = Fixture::builder().worklet(factory.clone()).build();
        let session = &fixture.session;

        let (_read, write) = stream::timing::notification_pipe().unwrap();
        session.set_worklet_node_ports(vec![processor::WorkletPortBinding {
            node_id: 4,
            processor_port: write,
        }]);
        assert_eq!(session.worklet_port_count(), 1);
        let Some(host) = factory.host() else {
            panic!("no host");
        };
        assert_eq!(host.initial_ports(), 1);

        session.shutdown();
        assert_eq!(session.worklet_port_count(), 0);
        assert!(!session.has_worklet_host());
    }

    #[test]
    fn events_reach_callbacks() {
        let factory = Arc::new(TestWorkletFactory::default());
        let fixture = Fixture::builder().worklet(factory.clone()).build();
        let session = &fixture.session;
        session.add_worklet_module(WorkletModule::default());
        let Some(events) = factory.events() else {
            panic!("host got no event sink");
        };

        // Queued before anyone listens.
        events.processor_error(3);
        events.processor_error(5);
        fixture.control.run_pending();

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let errors = errors.clone();
            session.on_processor_error(move |node_id| errors.lock().unwrap().push(node_id));
        }
        assert_eq!(*errors.lock().unwrap(), [3, 5]);

        events.processor_error(8);
        assert_eq!(errors.lock().unwrap().len(), 2);
        fixture.control.run_pending();
        assert_eq!(*errors.lock().unwrap(), [3, 5, 8]);

        let evaluations = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let evaluations = evaluations.clone();
            session.on_module_evaluated(move |evaluation| {
                evaluations.lock().unwrap().push(evaluation.module_id)
            });
        }
        events.module_evaluated(processor::ModuleEvaluation {
            module_id: 1,
            success: true,
            ..Default::default()
        });
        fixture.control.run_pending();
        assert_eq!(*evaluations.lock().unwrap(), [1]);
    }

    #[test]
    fn definitions_are_synchronized() {
        let factory = Arc::new(TestWorkletFactory::default());
        let fixture = Fixture::builder().worklet(factory.clone()).build();
        let session = &fixture.session;
        let definition = |node_id| processor::WorkletNodeDefinition {
            node_id,
            processor_name: "noise".into(),
            number_of_outputs: 1,
            output_channel_count: vec![2],
            ..Default::default()
        };

        session.set_worklet_node_definitions(vec![definition(3)]);
        let Some(host) = factory.host() else {
            panic!("no host");
        };
        assert_eq!(host.definitions(), 1);

        session.set_worklet_node_definitions(vec![definition(3), definition(4)]);
        assert_eq!(factory.created(), 1);
        assert_eq!(host.definitions(), 2);
    }

    #[test]
    fn no_factory_no_host() {
        let fixture = Fixture::new();
        fixture.session.add_worklet_module(WorkletModule::default());
        assert!(!fixture.session.has_worklet_host());
    }
}
