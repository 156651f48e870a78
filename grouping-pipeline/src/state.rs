use state_machines::state_machine;

state_machine! {
    name: BatchMachine,
    state: BatchState,
    initial: Pending,
    states: [Pending, InFlight, Completed, FellBack],
    events {
        dispatch { transition: { from: Pending, to: InFlight } }
        complete { transition: { from: InFlight, to: Completed } }
        fall_back { transition: { from: InFlight, to: FellBack } }
    }
}

pub fn pending() -> BatchMachine<(), Pending> {
    BatchMachine::new(())
}
