use phylotree::Tree;

use crate::model::Model;

/// Probability that a single site is constant (same state at every leaf)
/// under the model, averaged over mixture classes and rate categories.
///
/// This is the likelihood kernel backing the over-simulation length ratio:
/// the constant patterns are evaluated by Felsenstein pruning with an
/// explicit post-order stack; continuous gamma is bridged through its
/// four-category mean-rate approximation.
pub fn constant_pattern_prob(model: &Model, tree: &Tree, branch_scale: f64) -> f64 {
    let (rates, rate_weights) = model.rate_model().category_rates();
    let class_weights = model.class_weights();

    let mut p_const = 0.0;
    for (mix, &class_weight) in class_weights.iter().enumerate() {
        for (&rate, &rate_weight) in rates.iter().zip(&rate_weights) {
            let scale = rate * branch_scale;
            for pattern in 0..model.num_states() {
                p_const += class_weight
                    * rate_weight
                    * pattern_likelihood(model, tree, mix, scale, pattern);
            }
        }
    }
    p_const
}

/// Pruning likelihood of the pattern assigning `pattern` to every leaf.
fn pattern_likelihood(
    model: &Model,
    tree: &Tree,
    mix: usize,
    scale: f64,
    pattern: usize,
) -> f64 {
    let s = model.num_states();
    let root = tree.root();
    let mut partials: Vec<Option<Vec<f64>>> = vec![None; tree.num_nodes()];

    // Post-order over (node, dad), explicit stack.
    let mut stack: Vec<(usize, Option<usize>, bool)> = vec![(root, None, false)];
    while let Some((id, dad, expanded)) = stack.pop() {
        let node = tree.node(id);
        if !expanded {
            stack.push((id, dad, true));
            for edge in node.children(dad) {
                stack.push((edge.target, Some(id), false));
            }
            continue
        }

        let mut partial = vec![1.0; s];
        let mut is_leaf = true;
        for edge in node.children(dad) {
            is_leaf = false;
            let p = model.p_matrix(edge.length * scale, mix);
            let child = partials[edge.target]
                .take()
                .expect("post-order traversal always fills children first");
            for (x, value) in partial.iter_mut().enumerate() {
                let lumped: f64 = (0..s).map(|y| p[(x, y)] * child[y]).sum();
                *value *= lumped;
            }
        }
        if is_leaf {
            partial = vec![0.0; s];
            partial[pattern] = 1.0;
        }
        partials[id] = Some(partial);
    }

    let root_partial = partials[root]
        .take()
        .expect("root partial is always filled");
    model.freqs().iter()
        .zip(&root_partial)
        .map(|(&f, &l)| f * l)
        .sum()
}
