//! The requisition lifecycle state machine.
//!
//! Owns the authoritative in-memory working set of active requisitions and
//! is the sole writer of their status and participant sets. Inbound gateway
//! events are applied one at a time per requisition (each active entry has
//! its own mutex). The long waits (completion-details collection,
//! post-archive feedback, guided command prompts) run as spawned tasks so
//! they never hold up signal processing for other requisitions.
//!
//! Failure policy (none of these crash the process):
//! - validation/parse failures are reported back to the invoking participant
//! - gateway `NotFound`/`Forbidden` on best-effort operations are logged
//! - persistence failures after a successful post are logged durability
//!   warnings; the in-memory record stays authoritative

pub mod registry;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::command::{self, Command, RequestArgs, UpdateArgs};
use crate::deadline::parse_deadline;
use crate::errors::{LifecycleError, StoreError};
use crate::gateway::{Gateway, GatewayEvent, Marker, MessageScope, PendingReplies};
use crate::reminder::{Reminder, ReminderScheduler};
use crate::render;
use crate::requisition::{
    AcceptOutcome, ChannelConfig, ChannelId, CommunityId, CompleteOutcome, MessageHandle,
    ParticipantId, Requisition, RequisitionStatus,
};
use crate::settings::Settings;
use crate::store::{DbHandle, NewRequisition};
use crate::validate::{RequestFields, validate};

use registry::ActiveSet;

pub struct Lifecycle {
    gateway: Arc<dyn Gateway>,
    store: DbHandle,
    scheduler: ReminderScheduler,
    pending: PendingReplies,
    active: ActiveSet,
    configs: DashMap<CommunityId, ChannelConfig>,
    settings: Settings,
    /// Reactions from this identity are always ignored.
    service_identity: ParticipantId,
}

impl Lifecycle {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: DbHandle,
        settings: Settings,
        service_identity: ParticipantId,
    ) -> Arc<Self> {
        let scheduler = ReminderScheduler::new(Arc::clone(&gateway));
        Arc::new(Self {
            gateway,
            store,
            scheduler,
            pending: PendingReplies::new(),
            active: ActiveSet::new(),
            configs: DashMap::new(),
            settings,
            service_identity,
        })
    }

    /// Reload channel configuration and the active working set from the
    /// store. Reminders are not restored (they do not survive a restart);
    /// requisitions whose completion condition already holds resume their
    /// details collection or archival.
    pub async fn restore(self: Arc<Self>) -> Result<usize, StoreError> {
        let configs = self.store.call(|s| s.load_channel_configs()).await?;
        let config_count = configs.len();
        for (community, config) in configs {
            self.configs.insert(community, config);
        }

        let requisitions = self.store.call(|s| s.load_active()).await?;
        let count = requisitions.len();
        for req in requisitions {
            let Some(handle) = req.message_handle else {
                continue;
            };
            let ready = req.all_complete();
            let details_done = !req.completion_details.is_empty();
            self.active.insert_restored(req);
            if ready {
                let this = Arc::clone(&self);
                if details_done {
                    tokio::spawn(async move { this.try_archive(handle).await });
                } else {
                    tokio::spawn(async move { this.collect_details(handle).await });
                }
            }
        }
        info!(
            requisitions = count,
            communities = config_count,
            "restored working set"
        );
        Ok(count)
    }

    /// Drain the inbound event stream. Events are applied in arrival order;
    /// per-requisition serialization comes from the entry mutexes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<GatewayEvent>) {
        while let Some(event) = events.recv().await {
            Arc::clone(&self).handle_event(event).await;
        }
        self.scheduler.shutdown();
    }

    pub async fn handle_event(self: Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::ReactionAdded {
                handle,
                participant,
                marker,
            } => self.on_reaction(handle, participant, marker).await,
            GatewayEvent::Message {
                community,
                scope,
                participant,
                admin,
                text,
            } => {
                // A pending conversation consumes the next message from its
                // participant before any command parsing happens.
                if self.pending.resolve(participant, &text).await {
                    return;
                }
                if let MessageScope::Channel(channel) = scope {
                    self.on_command(community, channel, participant, admin, &text)
                        .await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Creation and announcement
    // ------------------------------------------------------------------

    /// Validate fields, parse the deadline, and persist a new draft.
    pub async fn create(
        &self,
        community: CommunityId,
        requester: ParticipantId,
        args: &RequestArgs,
    ) -> Result<i64, LifecycleError> {
        let fields = RequestFields {
            material: args.material.clone(),
            quantity: args.quantity,
            payment: args.payment.clone(),
            region: args.region.clone(),
        };
        validate(&fields)?;
        let deadline =
            parse_deadline(&args.deadline).ok_or_else(|| LifecycleError::UnparseableDeadline {
                input: args.deadline.clone(),
            })?;

        let new = NewRequisition {
            community,
            requester,
            material: args.material.clone(),
            quantity: args.quantity as u32,
            payment: args.payment.clone(),
            deadline,
            region: args.region.clone(),
        };
        let id = self.store.call(move |s| s.create_requisition(&new)).await?;
        debug!(id, %requester, "created draft requisition");
        Ok(id)
    }

    /// Post the announcement, attach the reaction affordances, open the
    /// requisition, and arm its reminder.
    ///
    /// The external post and the persistence write are not atomic: if the
    /// post succeeds but the write fails, the in-memory record is still
    /// treated as open and the handle's durability is best-effort.
    pub async fn announce(&self, id: i64) -> Result<MessageHandle, LifecycleError> {
        let mut req = self
            .store
            .call(move |s| s.get_requisition(id))
            .await?
            .ok_or(StoreError::MissingRow { id })?;
        if let Some(handle) = req.message_handle {
            return Ok(handle);
        }

        let config = self
            .config_for(req.community)
            .ok_or(LifecycleError::ChannelNotConfigured {
                community: req.community,
            })?;

        let text = render::announcement(&config.label, &req);
        let handle = self.gateway.post_message(config.announce, &text).await?;

        for marker in [Marker::Accept, Marker::Complete] {
            if let Err(e) = self.gateway.add_marker(config.announce, handle, marker).await {
                warn!(%handle, ?marker, error = %e, "failed to attach reaction affordance");
            }
        }

        req.set_message_handle(handle);
        req.advance(RequisitionStatus::Open);
        if let Err(e) = self
            .store
            .call(move |s| s.set_message_handle(id, handle))
            .await
        {
            warn!(id, %handle, error = %e, "failed to persist message handle; continuing with in-memory record");
        }

        self.scheduler.arm(
            handle,
            self.settings.reminder_delay(),
            Reminder {
                requester: req.requester,
                text: render::reminder_notice(&req.material),
            },
        );
        self.active.insert(req);
        info!(id, %handle, "requisition open");
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Reaction signals
    // ------------------------------------------------------------------

    async fn on_reaction(
        self: Arc<Self>,
        handle: MessageHandle,
        participant: ParticipantId,
        marker: Marker,
    ) {
        if participant == self.service_identity {
            return;
        }
        let Some(entry) = self.active.get(handle) else {
            return;
        };
        let mut entry = entry.lock().await;

        // Signals are honored until archival begins; a late accept while
        // details collection is in flight re-opens the completion condition.
        if !matches!(
            entry.req.status,
            RequisitionStatus::Open | RequisitionStatus::AwaitingDetails
        ) {
            return;
        }

        match marker {
            Marker::Accept => match entry.req.record_accept(participant) {
                AcceptOutcome::AlreadyAccepted => {}
                AcceptOutcome::Added => {
                    self.persist_participants(&entry.req).await;
                    let material = entry.req.material.clone();
                    let requester = entry.req.requester;
                    let accepted_notice = render::accepted_notice(&material);
                    let joined_notice = render::accepter_joined_notice(participant, &material);
                    let (to_accepter, to_requester) = futures::join!(
                        self.gateway.send_direct(participant, &accepted_notice),
                        self.gateway.send_direct(requester, &joined_notice),
                    );
                    for result in [to_accepter, to_requester] {
                        if let Err(e) = result {
                            warn!(%handle, error = %e, "failed to send acceptance notice");
                        }
                    }
                }
            },
            Marker::Complete => match entry.req.record_complete(participant) {
                CompleteOutcome::NotAccepter | CompleteOutcome::AlreadyCompleted => {}
                CompleteOutcome::Completed { all_complete } => {
                    self.persist_participants(&entry.req).await;
                    if !all_complete {
                        return;
                    }
                    if !entry.details_requested {
                        // First time the completion condition holds: collect
                        // details exactly once.
                        entry.details_requested = true;
                        entry.req.advance(RequisitionStatus::AwaitingDetails);
                        self.persist_status(&entry.req).await;

                        let requester = entry.req.requester;
                        let material = entry.req.material.clone();
                        if let Err(e) = self
                            .gateway
                            .send_direct(requester, &render::all_complete_notice(&material))
                            .await
                        {
                            warn!(%handle, error = %e, "failed to notify requester of completion");
                        }

                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.collect_details(handle).await });
                    } else if entry.details_done {
                        // A late accepter just completed and details were
                        // already collected: archival can proceed now.
                        let this = Arc::clone(&self);
                        tokio::spawn(async move { this.try_archive(handle).await });
                    }
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // Completion details and archival
    // ------------------------------------------------------------------

    /// Ask the last completer for free-text details, bounded by a timeout.
    /// Runs at most once per requisition.
    async fn collect_details(self: Arc<Self>, handle: MessageHandle) {
        let Some(entry_arc) = self.active.get(handle) else {
            return;
        };
        let (completer, requester, material) = {
            let entry = entry_arc.lock().await;
            let Some(completer) = entry.req.last_completer() else {
                return;
            };
            (
                completer,
                entry.req.requester,
                entry.req.material.clone(),
            )
        };

        if let Err(e) = self
            .gateway
            .send_direct(completer, &render::details_prompt(&material))
            .await
        {
            warn!(%handle, error = %e, "failed to prompt for completion details");
        }

        let reply = self
            .pending
            .wait_for(completer, self.settings.details_timeout())
            .await;
        let details = match reply {
            Some(text) => text,
            None => {
                debug!(%handle, "completion details timed out");
                render::NO_DETAILS_PROVIDED.to_string()
            }
        };

        {
            let mut entry = entry_arc.lock().await;
            entry.req.completion_details = details.clone();
            entry.details_done = true;
            let id = entry.req.id;
            let persisted = details.clone();
            if let Err(e) = self
                .store
                .call(move |s| s.set_completion_details(id, &persisted))
                .await
            {
                warn!(%handle, error = %e, "failed to persist completion details");
            }
        }

        if let Err(e) = self
            .gateway
            .send_direct(requester, &render::details_forwarded(&material, &details))
            .await
        {
            warn!(%handle, error = %e, "failed to forward completion details");
        }

        self.try_archive(handle).await;
    }

    /// Archive if the completion condition still holds. Re-invoked after a
    /// late accepter completes, so a requisition re-opened mid-collection
    /// waits for the newcomer rather than archiving early.
    async fn try_archive(self: Arc<Self>, handle: MessageHandle) {
        let Some(entry_arc) = self.active.get(handle) else {
            return;
        };
        let mut entry = entry_arc.lock().await;

        if !entry.req.all_complete() || !entry.details_done {
            debug!(%handle, "archival deferred; completion condition re-opened");
            return;
        }
        if entry.req.status == RequisitionStatus::Archiving
            || entry.req.status.is_terminal()
        {
            return;
        }

        let community = entry.req.community;
        let Some(config) = self.config_for(community) else {
            // Operator follow-up required; the requisition stays where it is.
            error!(
                %handle, %community,
                "cannot archive: community has no channel configuration"
            );
            return;
        };

        entry.req.advance(RequisitionStatus::Archiving);
        self.persist_status(&entry.req).await;

        let archive_text = render::archive_record(&config.label, &entry.req);
        let archived_handle = match self.gateway.post_message(config.archive, &archive_text).await {
            Ok(h) => h,
            Err(e) => {
                error!(%handle, error = %e, "failed to post archive record");
                return;
            }
        };

        if let Err(e) = self.gateway.delete_message(config.announce, handle).await {
            // Best-effort: a missing or protected announcement never blocks
            // archival.
            warn!(%handle, error = %e, "failed to delete original announcement");
        }

        self.scheduler.cancel(handle);
        entry.req.advance(RequisitionStatus::Archived);
        self.persist_status(&entry.req).await;

        let requester = entry.req.requester;
        drop(entry);
        self.active.remove(handle);
        info!(%handle, "requisition archived");

        let this = Arc::clone(&self);
        tokio::spawn(async move {
            this.run_feedback(requester, config.archive, archived_handle, archive_text)
                .await;
        });
    }

    /// Ask the requester for feedback and append it to the archive record.
    /// A reply after the timeout is discarded.
    async fn run_feedback(
        self: Arc<Self>,
        requester: ParticipantId,
        archive_channel: ChannelId,
        archived_handle: MessageHandle,
        archive_text: String,
    ) {
        if let Err(e) = self
            .gateway
            .send_direct(requester, &render::feedback_prompt())
            .await
        {
            warn!(%requester, error = %e, "failed to request feedback");
        }

        let Some(feedback) = self
            .pending
            .wait_for(requester, self.settings.feedback_timeout())
            .await
        else {
            debug!(%requester, "feedback window expired; archive record stands");
            return;
        };

        let amended = render::archive_feedback(&archive_text, &feedback);
        if let Err(e) = self
            .gateway
            .edit_message(archive_channel, archived_handle, &amended)
            .await
        {
            warn!(%archived_handle, error = %e, "failed to append feedback to archive record");
            return;
        }
        if let Err(e) = self
            .gateway
            .send_direct(requester, render::FEEDBACK_THANKS)
            .await
        {
            warn!(%requester, error = %e, "failed to acknowledge feedback");
        }
    }

    // ------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------

    /// Overwrite quantity, payment, and deadline of an open requisition and
    /// re-render its announcement. Material and requester never change.
    pub async fn update(&self, args: &UpdateArgs) -> Result<(), LifecycleError> {
        let entry_arc = self
            .active
            .get(args.handle)
            .ok_or(LifecycleError::NotFound {
                handle: args.handle,
            })?;
        let mut entry = entry_arc.lock().await;

        if entry.req.status != RequisitionStatus::Open {
            return Err(LifecycleError::NotOpen {
                id: entry.req.id,
                status: entry.req.status,
            });
        }

        let fields = RequestFields {
            material: entry.req.material.clone(),
            quantity: args.quantity,
            payment: args.payment.clone(),
            region: entry.req.region.clone(),
        };
        validate(&fields)?;
        let deadline =
            parse_deadline(&args.deadline).ok_or_else(|| LifecycleError::UnparseableDeadline {
                input: args.deadline.clone(),
            })?;

        entry.req.quantity = args.quantity as u32;
        entry.req.payment = args.payment.clone();
        entry.req.deadline = deadline;

        let id = entry.req.id;
        let quantity = entry.req.quantity;
        let payment = entry.req.payment.clone();
        if let Err(e) = self
            .store
            .call(move |s| s.update_fields(id, quantity, &payment, deadline))
            .await
        {
            warn!(id, error = %e, "failed to persist update; continuing with in-memory record");
        }

        if let Some(config) = self.config_for(entry.req.community) {
            let text = render::announcement(&config.label, &entry.req);
            if let Err(e) = self
                .gateway
                .edit_message(config.announce, args.handle, &text)
                .await
            {
                warn!(handle = %args.handle, error = %e, "failed to re-render announcement");
            }
        }
        info!(id, handle = %args.handle, "requisition updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Create or overwrite a community's channel configuration.
    pub async fn configure(
        &self,
        community: CommunityId,
        config: ChannelConfig,
    ) -> Result<(), LifecycleError> {
        let stored = config.clone();
        self.store
            .call(move |s| s.upsert_channel_config(community, &stored))
            .await?;
        self.configs.insert(community, config);
        info!(%community, "channel configuration updated");
        Ok(())
    }

    pub fn config_for(&self, community: CommunityId) -> Option<ChannelConfig> {
        self.configs.get(&community).map(|c| c.value().clone())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_command(
        self: Arc<Self>,
        community: CommunityId,
        channel: ChannelId,
        participant: ParticipantId,
        admin: bool,
        text: &str,
    ) {
        let parsed = match command::parse(text, &self.settings.command_prefix) {
            Some(parsed) => parsed,
            None => return,
        };
        let cmd = match parsed {
            Ok(cmd) => cmd,
            Err(usage) => {
                self.post(channel, usage).await;
                return;
            }
        };

        match cmd {
            Command::Configure {
                announce,
                archive,
                label,
            } => {
                if !admin {
                    self.post(channel, render::ADMIN_ONLY).await;
                    return;
                }
                let confirmation = render::config_confirmation(
                    &announce.to_string(),
                    &archive.to_string(),
                    &label,
                );
                match self
                    .configure(
                        community,
                        ChannelConfig {
                            announce,
                            archive,
                            label,
                        },
                    )
                    .await
                {
                    Ok(()) => self.post(channel, &confirmation).await,
                    Err(e) => {
                        error!(%community, error = %e, "failed to store channel configuration");
                        self.post(channel, "An error occurred while processing the command.")
                            .await;
                    }
                }
            }
            Command::Request(Some(args)) => {
                self.submit_request(community, channel, participant, args)
                    .await;
            }
            Command::Request(None) => {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.run_request_flow(community, channel, participant).await;
                });
            }
            Command::Update(Some(args)) => {
                self.submit_update(channel, &args).await;
            }
            Command::Update(None) => {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.run_update_flow(channel, participant).await;
                });
            }
        }
    }

    /// Create + announce, reporting failures back to the invoking channel.
    async fn submit_request(
        &self,
        community: CommunityId,
        channel: ChannelId,
        requester: ParticipantId,
        args: RequestArgs,
    ) {
        let id = match self.create(community, requester, &args).await {
            Ok(id) => id,
            Err(LifecycleError::Validation(errors)) => {
                self.post(channel, &format!("Validation failed: {}", errors))
                    .await;
                return;
            }
            Err(LifecycleError::UnparseableDeadline { .. }) => {
                self.post(
                    channel,
                    "Could not understand the deadline. Please enter a specific date.",
                )
                .await;
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to create requisition");
                self.post(channel, "An error occurred while processing the command.")
                    .await;
                return;
            }
        };

        match self.announce(id).await {
            Ok(_) => {}
            Err(LifecycleError::ChannelNotConfigured { .. }) => {
                // The draft stays as-is; there is no retry.
                self.post(channel, render::NOT_CONFIGURED_HINT).await;
            }
            Err(e) => {
                error!(id, error = %e, "failed to announce requisition; it remains a draft");
                self.post(channel, "Failed to post the requisition. Please try again.")
                    .await;
            }
        }
    }

    async fn submit_update(&self, channel: ChannelId, args: &UpdateArgs) {
        match self.update(args).await {
            Ok(()) => {
                self.post(
                    channel,
                    &format!("Requisition {} updated successfully.", args.handle),
                )
                .await;
            }
            Err(LifecycleError::NotFound { .. }) => {
                self.post(channel, "Requisition not found.").await;
            }
            Err(e @ LifecycleError::NotOpen { .. }) => {
                self.post(channel, &format!("Cannot update: {}", e)).await;
            }
            Err(LifecycleError::Validation(errors)) => {
                self.post(channel, &format!("Validation failed: {}", errors))
                    .await;
            }
            Err(LifecycleError::UnparseableDeadline { .. }) => {
                self.post(
                    channel,
                    "Could not understand the deadline. Please enter a specific date.",
                )
                .await;
            }
            Err(e) => {
                error!(error = %e, "failed to update requisition");
                self.post(channel, "An error occurred while processing the command.")
                    .await;
            }
        }
    }

    /// Five-step guided creation. Each prompt is bounded; a timeout aborts
    /// the whole flow.
    async fn run_request_flow(
        self: Arc<Self>,
        community: CommunityId,
        channel: ChannelId,
        requester: ParticipantId,
    ) {
        let Ok(material) = self.prompt(channel, requester, "What material do you need?").await
        else {
            return;
        };
        let Ok(quantity_text) = self.prompt(channel, requester, "How many do you need?").await
        else {
            return;
        };
        let Ok(quantity) = quantity_text.trim().parse::<i64>() else {
            self.post(channel, command::QUANTITY_NOT_A_NUMBER).await;
            return;
        };
        let Ok(payment) = self
            .prompt(channel, requester, "What is the payment method?")
            .await
        else {
            return;
        };
        let Ok(deadline) = self.prompt(channel, requester, "What is the deadline?").await
        else {
            return;
        };
        let Ok(region) = self.prompt(channel, requester, "What is the region?").await
        else {
            return;
        };

        let args = RequestArgs {
            material,
            quantity,
            payment,
            deadline,
            region,
        };
        self.submit_request(community, channel, requester, args)
            .await;
    }

    /// Four-step guided update.
    async fn run_update_flow(
        self: Arc<Self>,
        channel: ChannelId,
        participant: ParticipantId,
    ) {
        let Ok(handle_text) = self
            .prompt(
                channel,
                participant,
                "Please enter the message ID of the requisition you want to update:",
            )
            .await
        else {
            return;
        };
        let Ok(quantity_text) = self.prompt(channel, participant, "Enter the new quantity:").await
        else {
            return;
        };
        let (Ok(handle), Ok(quantity)) = (
            handle_text.trim().parse::<MessageHandle>(),
            quantity_text.trim().parse::<i64>(),
        ) else {
            self.post(channel, command::HANDLE_NOT_A_NUMBER).await;
            return;
        };
        let Ok(payment) = self
            .prompt(channel, participant, "Enter the new payment method:")
            .await
        else {
            return;
        };
        let Ok(deadline) = self.prompt(channel, participant, "Enter the new deadline:").await
        else {
            return;
        };

        let args = UpdateArgs {
            handle,
            quantity,
            payment,
            deadline,
        };
        self.submit_update(channel, &args).await;
    }

    /// Ask one guided-flow question and wait for the participant's next
    /// message. Timing out reports the abort and fails the flow.
    async fn prompt(
        &self,
        channel: ChannelId,
        participant: ParticipantId,
        question: &str,
    ) -> Result<String, LifecycleError> {
        self.post(channel, question).await;
        match self
            .pending
            .wait_for(participant, self.settings.prompt_timeout())
            .await
        {
            Some(text) => Ok(text),
            None => {
                self.post(channel, render::CREATION_TIMED_OUT).await;
                Err(LifecycleError::PromptTimeout)
            }
        }
    }

    // ------------------------------------------------------------------
    // Small helpers
    // ------------------------------------------------------------------

    /// Post to a channel, logging instead of failing; used for command
    /// feedback where delivery is best-effort.
    async fn post(&self, channel: ChannelId, text: &str) {
        if let Err(e) = self.gateway.post_message(channel, text).await {
            warn!(%channel, error = %e, "failed to post message");
        }
    }

    async fn persist_participants(&self, req: &Requisition) {
        let id = req.id;
        let accepted = req.accepted_by.clone();
        let completed = req.completed_by.clone();
        if let Err(e) = self
            .store
            .call(move |s| s.set_participants(id, &accepted, &completed))
            .await
        {
            warn!(id, error = %e, "failed to persist participant sets");
        }
    }

    async fn persist_status(&self, req: &Requisition) {
        let id = req.id;
        let status = req.status;
        if let Err(e) = self.store.call(move |s| s.set_status(id, status)).await {
            warn!(id, error = %e, "failed to persist status");
        }
    }
}
