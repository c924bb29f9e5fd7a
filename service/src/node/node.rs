use std::{any::Any, collections::HashMap, mem, net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use courier_shared::{
    ActionPoster, ActionQueue, ActorId, ConfinementQueue, ConnectionId, CorrelationId, ErrorCode,
    Frame, Message, Request,
};

use crate::{
    dispatcher::{error_reply, DeferredReply, Dispatcher, HandlerContext},
    error::{HandlerError, NodeError, RouteError, ServiceError},
    events::{AcceptEvent, ChannelErrorEvent, ConnectEvent, FrameEvent},
    router::{Route, Router},
    session::{Incoming, RelayTarget, ResponseFuture, Session},
    transport::Endpoint,
    NodeConfig, NodeEvents, Service,
};

/// Owns one Service, a Session per connection, the handler table and the
/// actor router. The one object a game loop pumps.
pub struct Node {
    service: Service,
    sessions: HashMap<ConnectionId, Session>,
    dispatcher: Arc<Dispatcher>,
    router: Router,
    replies: ConfinementQueue<DeferredReply>,
    actions: ActionQueue,
    next_session_instance: u64,
    incoming_events: NodeEvents,
    disposed: bool,
}

impl Node {
    pub fn new(config: NodeConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, NodeError> {
        let service = Service::create(config.service)?;
        Ok(Self {
            service,
            sessions: HashMap::new(),
            dispatcher,
            router: Router::new(config.address),
            replies: ConfinementQueue::new(),
            actions: ActionQueue::new(),
            next_session_instance: 0,
            incoming_events: NodeEvents::new(),
            disposed: false,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.service.local_addr()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut Service {
        &mut self.service
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn session(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Calls still waiting for a response on the connection
    pub fn pending_count(&self, id: ConnectionId) -> usize {
        self.sessions.get(&id).map_or(0, Session::pending_count)
    }

    /// Makes the calling thread the one allowed to pump this Node
    pub fn claim_thread(&mut self) {
        self.service.claim_thread();
        self.replies.claim();
        self.actions.claim();
    }

    /// Runs closures on the thread that pumps this Node: at once when
    /// posted from that thread, otherwise during the next pump. Take posters
    /// after [`Node::claim_thread`].
    pub fn action_poster(&self) -> ActionPoster {
        self.actions.poster()
    }

    // Connections

    /// Opens (or reuses) the connection to `endpoint`. Messages and calls
    /// can be issued right away; they are sent once connected.
    pub fn connect(&mut self, endpoint: impl Into<Endpoint>) -> Result<ConnectionId, NodeError> {
        let id = self.service.get_or_create_channel(endpoint)?.id();
        self.ensure_session(id);
        Ok(id)
    }

    /// Closes the connection; its pending calls resolve with `ChannelClosed`
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.service.remove(id);
        self.close_session(id, ErrorCode::ChannelClosed);
    }

    /// Replaces the connection's Session. Pending calls resolve with
    /// `ChannelClosed` and Responders issued by the old Session are ignored.
    pub fn reset_session(&mut self, id: ConnectionId) -> Result<(), NodeError> {
        let Some(mut session) = self.sessions.remove(&id) else {
            return Err(NodeError::SessionNotFound { id });
        };
        for target in session.dispose() {
            self.fail_relay(target);
        }
        self.ensure_session(id);
        Ok(())
    }

    fn ensure_session(&mut self, id: ConnectionId) -> &mut Session {
        let next_instance = &mut self.next_session_instance;
        self.sessions.entry(id).or_insert_with(|| {
            *next_instance += 1;
            Session::new(id, *next_instance)
        })
    }

    fn session_mut(&mut self, id: ConnectionId) -> Result<&mut Session, NodeError> {
        self.sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })
    }

    // Messaging

    pub fn send<M: Message>(&mut self, id: ConnectionId, message: &M) -> Result<(), NodeError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })?;
        Ok(session.send(&mut self.service, message)?)
    }

    pub fn call<Q: Request>(
        &mut self,
        id: ConnectionId,
        request: &Q,
    ) -> Result<ResponseFuture<Q::Response>, NodeError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })?;
        Ok(session.call(&mut self.service, request)?)
    }

    pub fn call_with_cancel<Q: Request>(
        &mut self,
        id: ConnectionId,
        request: &Q,
        token: CancellationToken,
    ) -> Result<ResponseFuture<Q::Response>, NodeError> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })?;
        Ok(session.call_with_cancel(&mut self.service, request, token)?)
    }

    /// Cancels a pending call. Returns whether it was still pending.
    pub fn cancel(&mut self, id: ConnectionId, correlation_id: CorrelationId) -> bool {
        self.session_mut(id)
            .map_or(false, |session| session.cancel(correlation_id))
    }

    // Actors

    pub fn register_actor<A: Any + Send>(&mut self, instance_id: i64, actor: A) -> ActorId {
        self.router.register_actor(instance_id, actor);
        self.router.local_actor_id(instance_id)
    }

    pub fn remove_actor(&mut self, instance_id: i64) -> Option<Box<dyn Any + Send>> {
        self.router.remove_actor(instance_id)
    }

    /// Sends a one-way message to an actor hosted by another process
    pub fn send_to_actor<M: Message>(&mut self, actor: ActorId, message: &M) -> Result<(), NodeError> {
        let id = self.remote_connection_for(actor)?;
        let frame = Frame::message(M::opcode(), message.to_payload()).with_actor(actor);
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })?;
        Ok(session.send_frame(&mut self.service, &frame)?)
    }

    /// Calls an actor hosted by another process
    pub fn call_actor<Q: Request>(
        &mut self,
        actor: ActorId,
        request: &Q,
    ) -> Result<ResponseFuture<Q::Response>, NodeError> {
        let id = self.remote_connection_for(actor)?;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(NodeError::SessionNotFound { id })?;
        Ok(session.call_with(&mut self.service, request, actor, None)?)
    }

    fn remote_connection_for(&mut self, actor: ActorId) -> Result<ConnectionId, NodeError> {
        match self.router.route(actor)? {
            Route::Local(_) => Err(RouteError::LocalTarget { actor }.into()),
            Route::Remote(endpoint) => self.connect(endpoint),
        }
    }

    // Scheduling

    /// Applies everything that happened since the last pump: transport
    /// events, incoming frames, canceled calls and deferred replies
    pub fn pump(&mut self) -> Result<NodeEvents, NodeError> {
        if self.disposed {
            return Ok(NodeEvents::new());
        }

        for session in self.sessions.values_mut() {
            session.sweep_canceled();
        }

        let mut events = self.service.pump()?;
        for (id, remote) in events.read::<AcceptEvent>() {
            self.ensure_session(id);
            self.incoming_events.push_opened(id, Some(remote));
        }
        for id in events.read::<ConnectEvent>() {
            self.ensure_session(id);
            self.incoming_events.push_opened(id, None);
        }
        for (id, frame) in events.read::<FrameEvent>() {
            self.handle_frame(id, frame);
        }
        for (id, code) in events.read::<ChannelErrorEvent>() {
            self.close_session(id, code);
        }

        self.apply_deferred_replies()?;
        self.actions.run_pending().map_err(ServiceError::from)?;

        Ok(mem::replace(&mut self.incoming_events, NodeEvents::new()))
    }

    /// Blocks until there is something to pump or `timeout` elapses
    pub fn wait_for_activity(&self, timeout: Duration) -> Result<bool, NodeError> {
        if !self.replies.is_empty() || !self.actions.is_empty() {
            return Ok(true);
        }
        Ok(self.service.wait_for_activity(timeout)?)
    }

    fn handle_frame(&mut self, id: ConnectionId, frame: Frame) {
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!("{} frame for a connection without session", id);
            return;
        };
        match session.receive(frame) {
            Incoming::Resolved | Incoming::Dropped => {}
            Incoming::Relay { target, frame } => self.relay_back(target, &frame),
            Incoming::Dispatch(frame) => self.dispatch(id, frame),
        }
    }

    fn dispatch(&mut self, id: ConnectionId, frame: Frame) {
        if !frame.is_actor_addressed() {
            self.run_handler(id, &frame, None);
            return;
        }

        match self.router.route(frame.actor_id()) {
            Ok(Route::Local(instance_id)) => self.run_handler(id, &frame, Some(instance_id)),
            Ok(Route::Remote(endpoint)) => self.forward(id, frame, endpoint),
            Err(route_error) => {
                debug!("{} cannot route {}: {}", id, frame.actor_id(), route_error);
                if !frame.is_one_way() {
                    let error = HandlerError::from(route_error);
                    let reply = error_reply(&frame, error.error_code(), error.to_string());
                    self.reply(id, &reply);
                }
            }
        }
    }

    fn run_handler(&mut self, id: ConnectionId, frame: &Frame, instance_id: Option<i64>) {
        let dispatcher = self.dispatcher.clone();
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let actor = instance_id.and_then(|instance_id| self.router.actor_entry(instance_id));
        let reply = {
            let mut context = HandlerContext::new(
                frame.actor_id(),
                session,
                &mut self.service,
                actor,
                self.replies.poster(),
            );
            dispatcher.dispatch(&mut context, frame)
        };
        if let Some(reply) = reply {
            self.reply(id, &reply);
        }
    }

    /// Sends an actor-addressed frame on to the process hosting the actor,
    /// ActorId untouched
    fn forward(&mut self, origin_id: ConnectionId, frame: Frame, endpoint: Endpoint) {
        let Some(origin_instance) = self.sessions.get(&origin_id).map(Session::instance_id) else {
            return;
        };
        let origin = RelayTarget {
            connection_id: origin_id,
            session_instance: origin_instance,
            opcode: frame.opcode(),
            correlation_id: frame.correlation_id(),
            actor_id: frame.actor_id(),
        };

        let result = self.forward_to(endpoint, &frame, origin);
        if let Err(error) = result {
            warn!("{} could not forward to {}: {}", origin_id, frame.actor_id(), error);
            if !frame.is_one_way() {
                self.fail_relay(origin);
            }
        }
    }

    fn forward_to(
        &mut self,
        endpoint: Endpoint,
        frame: &Frame,
        origin: RelayTarget,
    ) -> Result<(), NodeError> {
        let target_id = self.connect(endpoint)?;
        let session = self
            .sessions
            .get_mut(&target_id)
            .ok_or(NodeError::SessionNotFound { id: target_id })?;
        if frame.is_one_way() {
            session.send_frame(&mut self.service, frame)?;
        } else {
            session.relay(&mut self.service, frame, origin)?;
        }
        Ok(())
    }

    /// Sends a response to a forwarded request back to its origin under the
    /// original correlation id
    fn relay_back(&mut self, target: RelayTarget, frame: &Frame) {
        if !self.origin_is_current(&target) {
            debug!("{} origin of relayed call is gone", target.connection_id);
            return;
        }
        let reply = Frame::new(
            frame.opcode(),
            target.correlation_id,
            target.actor_id,
            frame.flags(),
            frame.payload().clone(),
        );
        self.reply(target.connection_id, &reply);
    }

    fn fail_relay(&mut self, target: RelayTarget) {
        if !self.origin_is_current(&target) {
            return;
        }
        let request = Frame::new(
            target.opcode,
            target.correlation_id,
            target.actor_id,
            0,
            Default::default(),
        );
        let reply = error_reply(
            &request,
            ErrorCode::ChannelClosed,
            "Connection to the actor's process closed".to_string(),
        );
        self.reply(target.connection_id, &reply);
    }

    fn origin_is_current(&self, target: &RelayTarget) -> bool {
        self.sessions
            .get(&target.connection_id)
            .map(Session::instance_id)
            == Some(target.session_instance)
    }

    fn reply(&mut self, id: ConnectionId, frame: &Frame) {
        if let Err(error) = self.service.send(id, frame) {
            debug!("{} reply dropped: {}", id, error);
        }
    }

    fn apply_deferred_replies(&mut self) -> Result<(), NodeError> {
        let mut replies = Vec::new();
        self.replies
            .drain(|reply| replies.push(reply))
            .map_err(ServiceError::from)?;

        for reply in replies {
            let current = self
                .sessions
                .get(&reply.connection_id)
                .map(Session::instance_id);
            if current != Some(reply.session_instance) {
                debug!(
                    "{} discarding deferred reply from a previous session",
                    reply.connection_id
                );
                continue;
            }
            self.reply(reply.connection_id, &reply.frame);
        }
        Ok(())
    }

    fn close_session(&mut self, id: ConnectionId, code: ErrorCode) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        info!("{} session closed: {}", id, code);
        for target in session.dispose() {
            self.fail_relay(target);
        }
        self.incoming_events.push_closed(id, code);
    }

    /// Resolves every pending call with `ChannelClosed` and disposes the
    /// Service. Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for (_, mut session) in self.sessions.drain() {
            session.dispose();
        }
        self.service.dispose();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.dispose();
    }
}
