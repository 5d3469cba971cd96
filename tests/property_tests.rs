//! Property-based tests for rust_log_pipeline using proptest

use proptest::prelude::*;
use rust_log_pipeline::core::{Instant, RecyclerFactory, RingTransport};
use rust_log_pipeline::prelude::*;
use std::collections::{BTreeMap, VecDeque};

fn any_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Trace),
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
        Just(LogLevel::Fatal),
    ]
}

fn any_recycler() -> impl Strategy<Value = RecyclerKind> {
    prop_oneof![
        Just(RecyclerKind::Dummy),
        Just(RecyclerKind::ThreadLocal),
        Just(RecyclerKind::QueueingThreadLocal),
    ]
}

// ============================================================================
// LogLevel Tests
// ============================================================================

proptest! {
    /// Test that LogLevel string conversions roundtrip correctly
    #[test]
    fn test_log_level_str_roundtrip(level in any_level()) {
        let parsed: LogLevel = level.to_str().parse().unwrap();
        prop_assert_eq!(level, parsed);
        let lower: LogLevel = level.to_lowercase_str().parse().unwrap();
        prop_assert_eq!(level, lower);
    }

    /// Test that only ERROR and FATAL are critical
    #[test]
    fn test_critical_levels(level in any_level()) {
        prop_assert_eq!(level.is_critical(), level >= LogLevel::Error);
    }
}

// ============================================================================
// Formatter Tests
// ============================================================================

proptest! {
    /// Rendering the same record twice with pooled buffers gives identical output
    #[test]
    fn test_render_is_repeatable(
        kind in any_recycler(),
        level in any_level(),
        message in "[a-zA-Z0-9 {}]{0,40}",
        args in prop::collection::vec("[a-z0-9]{0,8}", 0..4),
        fields in prop::collection::btree_map("[a-z]{1,6}", "[a-zA-Z0-9]{0,8}", 0..5),
        millis in 0i64..4_102_444_800_000,
    ) {
        let factory = RecyclerFactory::new(kind, 4);
        let chain = FormatterChain::from_pattern_with(
            "%d{ISO8601} [%t] %-5p %c{1} %X - %m%n%sn",
            &factory,
        )
        .unwrap();

        let mut context = ContextMap::new();
        for (key, value) in &fields {
            context.insert(key.clone(), value.clone());
        }
        let message = Message::template(message, args);
        let record = EventRecord::new("org.example.Service", level, message)
            .with_instant(Instant::from_epoch_millis(millis))
            .with_thread(7, Some("worker"))
            .with_context(context);

        let first = chain.render_to_string(&record);
        let second = chain.render_to_string(&record);
        prop_assert_eq!(first, second);
    }

    /// A template without placeholders renders verbatim
    #[test]
    fn test_plain_template_renders_verbatim(text in "[a-zA-Z0-9 .,:;-]{0,64}") {
        let message = Message::template(text.clone(), vec!["unused".to_string()]);
        prop_assert_eq!(message.formatted(), text);
    }

    /// Every `{}` consumes one argument in order
    #[test]
    fn test_template_consumes_args_in_order(args in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let template = vec!["{}"; args.len()].join("-");
        let message = Message::template(template, args.clone());
        prop_assert_eq!(message.formatted(), args.join("-"));
    }
}

// ============================================================================
// Context Tests
// ============================================================================

proptest! {
    /// The context converter lists every key once, in sorted order
    #[test]
    fn test_context_rendered_sorted_and_unique(
        pairs in prop::collection::vec(("[a-c]{1,2}", "[0-9]{1,3}"), 0..12),
    ) {
        let mut context = ContextMap::new();
        let mut model = BTreeMap::new();
        for (key, value) in &pairs {
            context.insert(key.clone(), value.clone());
            model.insert(key.clone(), value.clone());
        }

        let chain = FormatterChain::from_pattern("%X").unwrap();
        let record = EventRecord::new("app", LogLevel::Info, "m").with_context(context);
        let expected = format!(
            "{{{}}}",
            model
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ")
        );
        prop_assert_eq!(chain.render_to_string(&record), expected);
    }

    /// A captured snapshot never sees later mutations
    #[test]
    fn test_snapshot_is_isolated(
        before in prop::collection::btree_map("[a-z]{1,4}", "[0-9]{1,3}", 0..6),
        key in "[a-z]{1,4}",
    ) {
        let mut live = ContextMap::new();
        for (k, v) in &before {
            live.insert(k.clone(), v.clone());
        }
        let snapshot = live.clone();
        live.insert(key.clone(), "changed");

        prop_assert_eq!(snapshot.get(&key), before.get(&key).map(String::as_str));
        prop_assert_eq!(live.get(&key), Some("changed"));
    }
}

// ============================================================================
// Ring Transport Tests
// ============================================================================

#[derive(Debug, Clone)]
enum RingOp {
    Emit(u32),
    Pop,
}

fn ring_ops() -> impl Strategy<Value = Vec<RingOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => any::<u32>().prop_map(RingOp::Emit),
            2 => Just(RingOp::Pop),
        ],
        0..200,
    )
}

proptest! {
    /// A single-threaded ring behaves like a bounded FIFO queue
    #[test]
    fn test_ring_matches_bounded_queue(capacity_exp in 1u32..6, ops in ring_ops()) {
        let capacity = 1usize << capacity_exp;
        let ring = RingTransport::new(capacity).unwrap();
        let mut model = VecDeque::new();
        let mut next_seq = 0u64;

        for op in ops {
            match op {
                RingOp::Emit(value) => {
                    let accepted = ring.try_emit(value).is_accepted();
                    prop_assert_eq!(accepted, model.len() < capacity);
                    if accepted {
                        model.push_back((next_seq, value));
                        next_seq += 1;
                    }
                }
                RingOp::Pop => {
                    prop_assert_eq!(ring.try_pop(), model.pop_front());
                }
            }
            prop_assert_eq!(ring.len(), model.len());
        }
    }

    /// Capacity is always rounded up to a power of two
    #[test]
    fn test_ring_capacity_power_of_two(requested in 1usize..100_000) {
        let ring = RingTransport::<u8>::new(requested).unwrap();
        prop_assert!(ring.capacity().is_power_of_two());
        prop_assert!(ring.capacity() >= requested);
        prop_assert!(ring.capacity() < requested.max(2) * 2);
    }
}

// ============================================================================
// Filter Tests
// ============================================================================

proptest! {
    /// A level range filter passes exactly the levels inside the range
    #[test]
    fn test_level_range_filter(min in any_level(), max in any_level(), level in any_level()) {
        let filter = LevelRangeFilter::new(min, max);
        let record = EventRecord::new("app", level, "m");
        let inside = level >= min.min(max) && level <= max.max(min);
        prop_assert_eq!(filter.filter(&record).passes(), inside);
    }
}
