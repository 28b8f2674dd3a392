use std::collections::VecDeque;
use std::sync::Arc;

use proptest::prelude::*;
use reqchain_engine::ring::RingBuffer;
use reqchain_types::{Config, ConfigType, FieldKey};

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<u32>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #[test]
    fn ring_matches_bounded_queue_model(cap in 1usize..9, ops in prop::collection::vec(op(), 0..200)) {
        let ring = RingBuffer::new(cap);
        let capacity = ring.capacity();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Op::Push(v) => {
                    let pushed = ring.try_push(v).is_ok();
                    prop_assert_eq!(pushed, model.len() < capacity);
                    if pushed {
                        model.push_back(v);
                    }
                }
                Op::Pop => prop_assert_eq!(ring.try_pop(), model.pop_front()),
            }
            prop_assert_eq!(ring.len(), model.len());
        }
    }

    #[test]
    fn spsc_delivers_every_value_once_in_order(cap in 1usize..8, count in 0u32..2000) {
        let ring = Arc::new(RingBuffer::new(cap));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for v in 0..count {
                    if ring.write(v).is_err() {
                        break;
                    }
                }
                ring.close();
            })
        };

        let mut received = Vec::with_capacity(count as usize);
        while let Some(v) = ring.read() {
            received.push(v);
        }
        producer.join().unwrap();
        prop_assert_eq!(received, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn splice_touches_only_the_range(
        field in prop::collection::vec(any::<u8>(), 0..64),
        a in 0usize..80,
        b in 0usize..80,
        replacement in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut cfg = Config::blank(ConfigType::Http);
        cfg.set_field(FieldKey::Body, &field).unwrap();
        let (start, end) = (a.min(b), a.max(b));

        let result = cfg.splice(FieldKey::Body, start, end, &replacement);
        let body = cfg.field(FieldKey::Body).unwrap();
        if end <= field.len() {
            prop_assert!(result.is_ok());
            let mut expected = field[..start].to_vec();
            expected.extend_from_slice(&replacement);
            expected.extend_from_slice(&field[end..]);
            prop_assert_eq!(body, expected.as_slice());
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(body, field.as_slice());
        }
    }
}
