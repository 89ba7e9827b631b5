//! アキュムレータ整合性のプロパティテスト
//!
//! ランダム重みの下で、差分更新が「最初から作り直した状態」と
//! ビット単位で一致することを検証する。

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rgomoku_core::eval::accumulator::{Mix8Accumulator, ValueSum};
use rgomoku_core::eval::weight::Mix8Weight;
use rgomoku_core::types::Color;
use std::sync::OnceLock;

/// テスト全体で共有するランダム重み
///
/// 値域は i16 の飽和域から十分離した小さめの範囲にしてある。
fn random_weight() -> &'static Mix8Weight {
    static WEIGHT: OnceLock<Mix8Weight> = OnceLock::new();
    WEIGHT.get_or_init(|| {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x5eed_cafe);
        let mut w = Mix8Weight::zeroed();

        for row in w.mapping.iter_mut() {
            for v in row.0.iter_mut() {
                *v = rng.gen_range(-300..=300);
            }
        }
        for v in w.map_prelu_weight.0.iter_mut() {
            *v = rng.gen_range(-16384..=16384);
        }
        for conv in w.feature_dwconv_weight.iter_mut() {
            for v in conv.0.iter_mut() {
                *v = rng.gen_range(-16384..=16384);
            }
        }
        for v in w.feature_dwconv_bias.0.iter_mut() {
            *v = rng.gen_range(-2000..=2000);
        }
        w.value_sum_scale_after_conv = 1.0 / 64.0;
        w.value_sum_scale_direct = 1.0 / 16.0;
        w.num_head_buckets = 4;

        for bucket in w.buckets.iter_mut() {
            for tensor in [
                &mut bucket.value_corner_weight,
                &mut bucket.value_corner_bias,
                &mut bucket.value_corner_prelu,
                &mut bucket.value_edge_weight,
                &mut bucket.value_edge_bias,
                &mut bucket.value_edge_prelu,
                &mut bucket.value_center_weight,
                &mut bucket.value_center_bias,
                &mut bucket.value_center_prelu,
                &mut bucket.value_quad_weight,
                &mut bucket.value_quad_bias,
                &mut bucket.value_quad_prelu,
                &mut bucket.value_l1_weight,
                &mut bucket.value_l1_bias,
                &mut bucket.value_l2_weight,
                &mut bucket.value_l2_bias,
                &mut bucket.value_l3_weight,
                &mut bucket.value_l3_bias,
                &mut bucket.policy_pwconv_l1_weight,
                &mut bucket.policy_pwconv_l1_bias,
                &mut bucket.policy_pwconv_l1_prelu,
                &mut bucket.policy_pwconv_l2_weight,
                &mut bucket.policy_pwconv_l2_bias,
            ] {
                for v in tensor.iter_mut() {
                    *v = rng.gen_range(-0.1..0.1);
                }
            }
            for v in bucket.policy_output_pos_weight.iter_mut() {
                *v = rng.gen_range(-0.5..0.5);
            }
            for v in bucket.policy_output_neg_weight.iter_mut() {
                *v = rng.gen_range(-0.5..0.5);
            }
            bucket.policy_output_bias = rng.gen_range(-0.5..0.5);
        }

        *w
    })
}

/// 空点からランダムに1点選ぶ
fn pick_empty(rng: &mut Xoshiro256PlusPlus, occupied: &[bool], board_size: usize) -> (usize, usize) {
    loop {
        let x = rng.gen_range(0..board_size);
        let y = rng.gen_range(0..board_size);
        if !occupied[x + y * board_size] {
            return (x, y);
        }
    }
}

/// k 手のランダム着手列（黒白交互）を作る
fn random_game(
    rng: &mut Xoshiro256PlusPlus,
    board_size: usize,
    moves: usize,
) -> Vec<(Color, usize, usize)> {
    let mut occupied = vec![false; board_size * board_size];
    let mut game = Vec::with_capacity(moves);
    for i in 0..moves {
        let (x, y) = pick_empty(rng, &occupied, board_size);
        occupied[x + y * board_size] = true;
        let color = if i % 2 == 0 { Color::Black } else { Color::White };
        game.push((color, x, y));
    }
    game
}

#[test]
fn accumulator_move_undo_roundtrip() {
    let w = random_weight();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);

    for board_size in [6usize, 9, 15] {
        let mut acc = Mix8Accumulator::new(board_size);
        let mut fresh = Mix8Accumulator::new(board_size);
        acc.clear(w);
        fresh.clear(w);

        let moves = (board_size * board_size / 4).min(40);
        let game = random_game(&mut rng, board_size, moves);

        let mut backups: Vec<ValueSum> = Vec::new();
        for &(color, x, y) in &game {
            backups.push(*acc.value_sum());
            acc.update_move(w, color, x, y);
        }

        for &(color, x, y) in game.iter().rev() {
            let backup = backups.pop().unwrap();
            acc.update_undo(w, color, x, y, &backup);
        }

        assert!(acc.state_eq(&fresh), "board_size={board_size}");
    }
}

#[test]
fn accumulator_interleaved_walk_roundtrip() {
    let w = random_weight();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let board_size = 15usize;

    let mut acc = Mix8Accumulator::new(board_size);
    let mut fresh = Mix8Accumulator::new(board_size);
    acc.clear(w);
    fresh.clear(w);

    // ランダムに着手と待ったを混ぜ、最後に全部戻す
    let mut occupied = vec![false; board_size * board_size];
    let mut stack: Vec<(Color, usize, usize, ValueSum)> = Vec::new();
    for step in 0..120 {
        let undo = !stack.is_empty() && rng.gen_bool(0.4);
        if undo {
            let (color, x, y, backup) = stack.pop().unwrap();
            acc.update_undo(w, color, x, y, &backup);
            occupied[x + y * board_size] = false;
        } else {
            let (x, y) = pick_empty(&mut rng, &occupied, board_size);
            occupied[x + y * board_size] = true;
            let color = if step % 2 == 0 { Color::Black } else { Color::White };
            stack.push((color, x, y, *acc.value_sum()));
            acc.update_move(w, color, x, y);
        }
    }
    while let Some((color, x, y, backup)) = stack.pop() {
        acc.update_undo(w, color, x, y, &backup);
    }

    assert!(acc.state_eq(&fresh));
}

#[test]
fn accumulator_incremental_matches_scratch() {
    let w = random_weight();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);

    for board_size in [9usize, 15] {
        let moves = (board_size * board_size / 3).min(60);
        let game = random_game(&mut rng, board_size, moves);

        // 差分更新で構築
        let mut incremental = Mix8Accumulator::new(board_size);
        incremental.clear(w);
        for &(color, x, y) in &game {
            incremental.update_move(w, color, x, y);
        }

        // 同じ局面を別の着手順で構築（整数状態は順序に依存しない）
        let mut shuffled = game.clone();
        for i in (1..shuffled.len()).rev() {
            let j = rng.gen_range(0..=i);
            shuffled.swap(i, j);
        }
        let mut scratch = Mix8Accumulator::new(board_size);
        scratch.clear(w);
        for &(color, x, y) in &shuffled {
            scratch.update_move(w, color, x, y);
        }

        assert!(incremental.state_eq(&scratch), "board_size={board_size}");

        // 整数状態が一致すれば float ヘッドの出力もビット一致する
        let a = incremental.evaluate_value(w);
        let b = scratch.evaluate_value(w);
        assert_eq!(a, b);
    }
}

#[test]
fn accumulator_value_head_is_finite() {
    let w = random_weight();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
    let board_size = 15usize;

    let mut acc = Mix8Accumulator::new(board_size);
    acc.clear(w);
    for &(color, x, y) in &random_game(&mut rng, board_size, 50) {
        acc.update_move(w, color, x, y);

        let (win, loss, draw) = acc.evaluate_value(w);
        assert!(win.is_finite() && loss.is_finite() && draw.is_finite());
    }
}

#[test]
fn accumulator_policy_head_matches_scratch() {
    use rgomoku_core::eval::PolicyBuffer;
    use rgomoku_core::types::Pos;

    let w = random_weight();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let board_size = 15usize;

    let game = random_game(&mut rng, board_size, 30);
    let mut incremental = Mix8Accumulator::new(board_size);
    incremental.clear(w);
    for &(color, x, y) in &game {
        incremental.update_move(w, color, x, y);
    }

    let mut scratch = Mix8Accumulator::new(board_size);
    scratch.clear(w);
    for &(color, x, y) in &game {
        scratch.update_move(w, color, x, y);
    }

    let mut buf_a = PolicyBuffer::new(board_size);
    let mut buf_b = PolicyBuffer::new(board_size);
    for y in 0..board_size {
        for x in 0..board_size {
            let occupied = game.iter().any(|&(_, gx, gy)| (gx, gy) == (x, y));
            buf_a.set_compute_flag(Pos::new(x, y), !occupied);
            buf_b.set_compute_flag(Pos::new(x, y), !occupied);
        }
    }

    incremental.evaluate_policy(w, &mut buf_a);
    scratch.evaluate_policy(w, &mut buf_b);

    buf_a.apply_softmax();
    buf_b.apply_softmax();

    let mut total = 0.0f32;
    for y in 0..board_size {
        for x in 0..board_size {
            let pos = Pos::new(x, y);
            assert_eq!(buf_a.get(pos), buf_b.get(pos));
            total += buf_a.get(pos);
        }
    }
    // softmax 後は計算対象セルの和が1
    assert!((total - 1.0).abs() < 1e-4);
}
