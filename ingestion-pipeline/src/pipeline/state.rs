use state_machines::state_machine;

state_machine! {
    name: PaperMachine,
    state: PaperState,
    initial: Ready,
    states: [Ready, Extracted, Persisted, Scheduled, Failed],
    events {
        extract { transition: { from: Ready, to: Extracted } }
        persist { transition: { from: Extracted, to: Persisted } }
        schedule { transition: { from: Persisted, to: Scheduled } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> PaperMachine<(), Ready> {
    PaperMachine::new(())
}
