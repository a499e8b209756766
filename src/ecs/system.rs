//! A system's declared identity (§4.5): name, access table, ordering edges, group
//! id, and the body entry point. The descriptor owns its own command buffers so a
//! parallel body's view records never share a writer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::tasks::Executor;
use crate::ecs::command::CommandBuffer;
use crate::ecs::component::ComponentTypeName;
use crate::ecs::error::CommandError;
use crate::ecs::query::ViewRecord;
use crate::ecs::store::Store;

/// A system's declared capability over one component type. Declared, never
/// inferred from the body (see spec Non-goals).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

type Body = Arc<dyn Fn(&ViewRecord, &mut CommandBuffer) + Send + Sync>;

/// The subset of a descriptor's fields the dependency builder needs to read.
/// Lets [`crate::ecs::schedule::builder::build`] run over either live descriptors
/// or a lock-free snapshot taken for the duration of a build.
pub trait DependencyInfo {
    fn access(&self) -> &HashMap<ComponentTypeName, Access>;
    fn before_edges(&self) -> &[String];
    fn after_edges(&self) -> &[String];
    fn group_id(&self) -> i32;
}

/// A schedulable unit of work: its access declarations, ordering edges, and body.
pub struct SystemDescriptor {
    name: String,
    access: HashMap<ComponentTypeName, Access>,
    before: Vec<String>,
    after: Vec<String>,
    group: i32,
    parallel: bool,
    body: Body,
    root_buffer: CommandBuffer,
    sub_buffers: Vec<CommandBuffer>,
}

impl SystemDescriptor {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ViewRecord, &mut CommandBuffer) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            access: HashMap::new(),
            before: Vec::new(),
            after: Vec::new(),
            group: 0,
            parallel: false,
            body: Arc::new(body),
            root_buffer: CommandBuffer::new(),
            sub_buffers: Vec::new(),
        }
    }

    pub fn reads(mut self, name: impl Into<ComponentTypeName>) -> Self {
        self.access.insert(name.into(), Access::ReadOnly);
        self
    }

    pub fn writes(mut self, name: impl Into<ComponentTypeName>) -> Self {
        self.access.insert(name.into(), Access::ReadWrite);
        self
    }

    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.before.push(name.into());
        self
    }

    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.after.push(name.into());
        self
    }

    pub fn group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> &HashMap<ComponentTypeName, Access> {
        &self.access
    }

    pub fn before_edges(&self) -> &[String] {
        &self.before
    }

    pub fn after_edges(&self) -> &[String] {
        &self.after
    }

    pub fn group_id(&self) -> i32 {
        self.group
    }

    /// Queries `multi_view(access.keys())` and dispatches the body once per matched
    /// view record: fanned out across `executor` if `parallel`, else sequentially
    /// against a single root buffer.
    pub fn run_tick(&mut self, store: &Arc<Store>, executor: &Executor) {
        let mut signature: Vec<ComponentTypeName> = self.access.keys().cloned().collect();
        signature.sort();
        if signature.is_empty() {
            return;
        }
        let views = store.multi_view(&signature).records();
        if views.is_empty() {
            return;
        }

        if self.parallel {
            if self.sub_buffers.len() < views.len() {
                self.sub_buffers.resize_with(views.len(), CommandBuffer::new);
            }
            let body = &self.body;
            let buffers = &mut self.sub_buffers[..views.len()];
            executor.scope(|scope| {
                for (view, buffer) in views.iter().zip(buffers.iter_mut()) {
                    scope.spawn(move || body(view, buffer));
                }
            });
        } else {
            for view in &views {
                (self.body)(view, &mut self.root_buffer);
            }
        }
    }

    /// Drains the sub-buffers (in view order), then the root buffer, against
    /// `store`. Called once per tick during end-of-tick finalisation.
    pub fn flush(&mut self, store: &Arc<Store>) -> Vec<CommandError> {
        let mut errors = Vec::new();
        for buffer in &mut self.sub_buffers {
            errors.extend(buffer.flush(store));
        }
        errors.extend(self.root_buffer.flush(store));
        errors
    }
}

impl DependencyInfo for SystemDescriptor {
    fn access(&self) -> &HashMap<ComponentTypeName, Access> {
        &self.access
    }
    fn before_edges(&self) -> &[String] {
        &self.before
    }
    fn after_edges(&self) -> &[String] {
        &self.after
    }
    fn group_id(&self) -> i32 {
        self.group
    }
}
