//! Fuzz target: ruleset install and evaluation
//!
//! Arbitrary JSON goes through parse, validate and install. Whatever
//! installs is then driven with a few frames; evaluation must terminate
//! on any wiring, cycles included.
//!
//! cargo fuzz run fuzz_ruleset

#![no_main]

use libfuzzer_sys::fuzz_target;
use w4rp::app::ports::ActionDelegate;
use w4rp::app::service::apply_ruleset_text;
use w4rp::rules::RuleGraph;
use w4rp::rules::model::Params;

struct Count(u32);

impl ActionDelegate for Count {
    fn on_action(&mut self, _capability_id: &str, _params: &Params) {
        self.0 += 1;
    }
}

fuzz_target!(|data: &[u8]| {
    let mut graph = RuleGraph::new();
    if apply_ruleset_text(&mut graph, data).is_err() {
        return;
    }

    let ids: Vec<u32> = graph.signals().iter().map(|s| s.can_id).collect();
    let mut count = Count(0);
    for (t, id) in ids.iter().enumerate() {
        graph.on_frame(*id, &[0xFF; 8], t as u32 * 10);
        graph.evaluate(t as u32 * 10, &mut count);
    }
});
