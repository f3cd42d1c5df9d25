use state_machines::state_machine;

state_machine! {
    name: AssemblyMachine,
    state: AssemblyState,
    initial: GlobalScan,
    states: [
        GlobalScan,
        ScopeResolution,
        Retrieval,
        AbstractFallback,
        WebFallback,
        PromptAssembly,
        Done,
        Failed
    ],
    events {
        scan { transition: { from: GlobalScan, to: ScopeResolution } }
        resolve_scope { transition: { from: ScopeResolution, to: Retrieval } }
        retrieve { transition: { from: Retrieval, to: AbstractFallback } }
        inject_abstracts { transition: { from: AbstractFallback, to: WebFallback } }
        search_web { transition: { from: WebFallback, to: PromptAssembly } }
        assemble { transition: { from: PromptAssembly, to: Done } }
        abort {
            transition: { from: GlobalScan, to: Failed }
            transition: { from: ScopeResolution, to: Failed }
            transition: { from: Retrieval, to: Failed }
            transition: { from: AbstractFallback, to: Failed }
            transition: { from: WebFallback, to: Failed }
            transition: { from: PromptAssembly, to: Failed }
        }
    }
}

pub fn global_scan() -> AssemblyMachine<(), GlobalScan> {
    AssemblyMachine::new(())
}
