// Engine order resolution

use super::EngineId;

/// Build the ordered, duplicate-free list of engines to try for a request:
/// the requested engine first, then the configured preferences, then the
/// in-process fallback if it has not appeared yet.
pub fn resolve_engine_order(requested: Option<EngineId>, preferred: &[EngineId]) -> Vec<EngineId> {
    let mut order = Vec::with_capacity(preferred.len() + 2);

    let candidates = requested
        .into_iter()
        .chain(preferred.iter().copied())
        .chain(std::iter::once(EngineId::FALLBACK));

    for engine in candidates {
        if !order.contains(&engine) {
            order.push(engine);
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_engine_deduplicated_against_preferred() {
        let order = resolve_engine_order(
            Some(EngineId::SidplayfpCli),
            &[EngineId::SidplayfpCli, EngineId::Ultimate64],
        );
        assert_eq!(order, vec![EngineId::SidplayfpCli, EngineId::Ultimate64, EngineId::Wasm]);
    }

    #[test]
    fn test_no_request_no_preferences_is_fallback_only() {
        assert_eq!(resolve_engine_order(None, &[]), vec![EngineId::Wasm]);
    }

    #[test]
    fn test_fallback_not_duplicated_when_preferred() {
        let order = resolve_engine_order(None, &[EngineId::Wasm, EngineId::SidplayfpCli]);
        assert_eq!(order, vec![EngineId::Wasm, EngineId::SidplayfpCli]);
    }

    #[test]
    fn test_requested_engine_goes_first() {
        let order = resolve_engine_order(
            Some(EngineId::Ultimate64),
            &[EngineId::SidplayfpCli, EngineId::Ultimate64, EngineId::SidplayfpCli],
        );
        assert_eq!(order, vec![EngineId::Ultimate64, EngineId::SidplayfpCli, EngineId::Wasm]);
    }

    #[test]
    fn test_requested_fallback_engine_still_appears_once() {
        let order = resolve_engine_order(Some(EngineId::Wasm), &[EngineId::SidplayfpCli]);
        assert_eq!(order, vec![EngineId::Wasm, EngineId::SidplayfpCli]);
    }
}
