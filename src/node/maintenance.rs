//! Ring maintenance: stabilization, successor list upkeep, finger repair, predecessor failure
//! detection and the replication pushes they trigger.

use super::Node;
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::node::task::PeriodicTask;
use crate::protocol::Network;
use crate::FINGER_TABLE_SIZE;

impl<N: Network> Node<N> {
    /// Starts the stabilize, fix fingers, fix successor list and check predecessor tasks.
    pub fn start_maintenance(&self) {
        let node = self.clone();
        let stabilize = PeriodicTask::spawn("stabilize", self.config.stabilize_interval, move || {
            node.stabilize()
        });
        let node = self.clone();
        let fix_fingers =
            PeriodicTask::spawn("fix-fingers", self.config.fix_fingers_interval, move || {
                node.fix_fingers()
            });
        let node = self.clone();
        let fix_successors = PeriodicTask::spawn(
            "fix-successor-list",
            self.config.fix_successors_interval,
            move || node.fix_successor_list(),
        );
        let node = self.clone();
        let check_predecessor = PeriodicTask::spawn(
            "check-predecessor",
            self.config.check_predecessor_interval,
            move || node.check_predecessor(),
        );

        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.extend(vec![stabilize, fix_fingers, fix_successors, check_predecessor]);
    }

    /// Cancels every running maintenance task.
    pub fn stop_maintenance(&self) {
        let tasks: Vec<PeriodicTask> = {
            let mut tasks = match self.tasks.lock() {
                Ok(tasks) => tasks,
                Err(poisoned) => poisoned.into_inner(),
            };
            tasks.drain(..).collect()
        };
        for task in tasks {
            debug!("{} - Cancelling {}", self.node_data.addr, task.name());
            task.cancel();
        }
    }

    /// Returns the first live successor. Dead entries ahead of it are purged from the
    /// successor list, which is refilled with this node when it runs out.
    pub fn get_successor(&self) -> NodeData {
        let successors = self.successors();
        let mut dead = Vec::new();
        for successor in successors {
            if self.ping(&successor) {
                break;
            }
            warn!("{} - Successor {} is not responding", self.node_data.addr, successor);
            dead.push(successor);
        }

        let mut state = self.lock_state();
        if !dead.is_empty() {
            state.remove_dead_successors(&dead);
            for node_data in &dead {
                state.remove_finger(node_data);
            }
        }
        state.successor().clone()
    }

    /// Runs one stabilization round: verifies the successor, adopts the successor's predecessor
    /// if it sits between the two nodes, and notifies the successor.
    pub fn stabilize(&self) {
        let successor = self.get_successor();
        let candidate = if successor == *self.node_data {
            self.predecessor()
        } else {
            match self.rpc_get_predecessor(&successor) {
                Ok(predecessor) => predecessor,
                Err(err) => {
                    debug!(
                        "{} - Could not fetch predecessor of {}: {}",
                        self.node_data.addr, successor, err
                    );
                    return;
                },
            }
        };

        let successor = {
            let mut state = self.lock_state();
            if let Some(candidate) = candidate {
                let adopt = candidate != *self.node_data
                    && (state.is_alone()
                        || candidate.id.between(state.id(), &state.successor().id));
                if adopt {
                    info!("{} - New successor {}", self.node_data.addr, candidate);
                    state.push_successor(candidate);
                }
            }
            state.successor().clone()
        };

        if successor != *self.node_data {
            self.notify_node(&successor);
        }
    }

    /// Notifies the current successor that this node might be its predecessor.
    pub fn notify(&self) {
        let successor = self.successor();
        if successor != *self.node_data {
            self.notify_node(&successor);
        }
    }

    fn notify_node(&self, dest: &NodeData) {
        if let Err(err) = self.rpc_notify(dest) {
            debug!("{} - Could not notify {}: {}", self.node_data.addr, dest, err);
        }
    }

    /// Handles a notify from `candidate`. When the candidate is adopted as the predecessor, the
    /// entries it is now responsible for are handed to it, and the entries this node owns are
    /// pushed to the successor as backups.
    pub(crate) fn handle_notify(&self, candidate: NodeData) {
        let (handover, backups, successor) = {
            let mut state = self.lock_state();
            let previous = match state.accept_notify(candidate.clone()) {
                Some(previous) => previous,
                None => {
                    debug!("{} - Ignoring notify from {}", self.node_data.addr, candidate);
                    return;
                },
            };
            let id = *state.id();
            let handover = match previous {
                Some(previous) => state.bucket().entries_in(&previous.id, &candidate.id),
                None => state.bucket().entries_outside(&candidate.id, &id),
            };
            let backups = state.bucket().entries_in(&candidate.id, &id);
            (handover, backups, state.successor().clone())
        };
        info!("{} - New predecessor {}", self.node_data.addr, candidate);

        self.replicate_to(&candidate, handover);
        if successor != *self.node_data {
            self.replicate_to(&successor, backups);
        }
    }

    /// Refreshes the whole finger table. Finger `i` is the successor of `self + 2^i`; a start
    /// already covered by the previous finger reuses it instead of a new lookup.
    pub fn fix_fingers(&self) {
        let id = self.node_data.id;
        let mut previous: Option<NodeData> = None;
        for index in 0..FINGER_TABLE_SIZE {
            let start = id.jump(index);
            let finger = match previous {
                Some(ref previous)
                    if *previous != *self.node_data
                        && start.between_inclusive_end(&id, &previous.id) =>
                {
                    previous.clone()
                },
                _ => self.find_successor(&start),
            };
            self.set_finger(index, Some(finger.clone()));
            previous = Some(finger);
        }
        debug!("{} - Fixed fingers", self.node_data.addr);
    }

    /// Rebuilds the successor list so that every slot is the successor of the slot before it.
    pub fn fix_successor_list(&self) {
        let size = self.lock_state().successor_list_size();
        let first = self.get_successor();
        let mut successors = vec![first];

        while successors.len() < size {
            let last: Key = match successors.last() {
                Some(last) if *last != *self.node_data => last.id,
                _ => break,
            };
            let next = self.find_successor(&last.jump(0));
            if next == *self.node_data || successors.contains(&next) {
                break;
            }
            successors.push(next);
        }

        debug!("{} - Successor list {:?}", self.node_data.addr, successors);
        self.set_successors(successors);
    }

    /// Pings the predecessor. On failure the predecessor is cleared and, since this node is now
    /// the only one holding the entries the two shared, every entry is pushed to the successor.
    pub fn check_predecessor(&self) {
        let predecessor = match self.predecessor() {
            Some(predecessor) => predecessor,
            None => return,
        };
        if self.ping(&predecessor) {
            return;
        }
        warn!("{} - Predecessor {} failed", self.node_data.addr, predecessor);

        let (entries, successor) = {
            let mut state = self.lock_state();
            if !state.clear_predecessor_if(&predecessor) {
                return;
            }
            state.remove_finger(&predecessor);
            (state.bucket().entries(), state.successor().clone())
        };
        if successor != *self.node_data {
            self.replicate_to(&successor, entries);
        }
    }

    /// Pushes bucket entries to `dest`, once each.
    pub(crate) fn replicate_to(&self, dest: &NodeData, entries: Vec<(String, Key)>) {
        for (key, owner) in entries {
            match self.rpc_replicate_key(dest, &key, owner) {
                Ok(()) => debug!("{} - Replicated {} to {}", self.node_data.addr, key, dest),
                Err(err) => warn!(
                    "{} - Could not replicate {} to {}: {}",
                    self.node_data.addr, key, dest, err
                ),
            }
        }
    }
}
