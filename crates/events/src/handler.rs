/// Execute an aggregate command in place (no IO, no async).
///
/// Decides with `handle`, then evolves the aggregate by applying each emitted
/// event. For the persisted pipeline use the infra `CommandDispatcher`.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: bookwell_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
