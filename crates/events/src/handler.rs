use tally_core::Aggregate;

/// Decide and evolve in one step, without a store.
///
/// Calls `handle` and, only if it succeeds, applies every produced event to
/// the aggregate. On error the aggregate is untouched. Useful in domain tests
/// and anywhere an aggregate is driven purely in memory.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
