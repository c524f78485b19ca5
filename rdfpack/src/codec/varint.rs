//! LEB128 unsigned varints and front coding, shared by every on-disk format.

pub fn push_uvarint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

/// Decode a varint at `off`, returning the value and the offset just past it.
pub fn read_uvarint(buf: &[u8], mut off: usize) -> Option<(u64, usize)> {
    let (mut x, mut s) = (0u64, 0u32);
    for _ in 0..10 {
        let b = *buf.get(off)? as u64;
        off += 1;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Some((x, off));
        }
        s += 7;
    }
    None
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Front-code a sorted run of byte strings.
///
/// Layout: `count`, then per element `[shared prefix len][suffix len][suffix]`.
pub fn encode_front_coded<'a, I>(elements: I, count: usize, out: &mut Vec<u8>)
where
    I: IntoIterator<Item = &'a [u8]>,
{
    push_uvarint(count as u64, out);
    let mut prev: &[u8] = &[];
    for e in elements {
        let shared = common_prefix_len(prev, e);
        push_uvarint(shared as u64, out);
        push_uvarint((e.len() - shared) as u64, out);
        out.extend_from_slice(&e[shared..]);
        prev = e;
    }
}

/// Inverse of [`encode_front_coded`].
pub fn decode_front_coded(buf: &[u8]) -> Option<Vec<Vec<u8>>> {
    let (n, mut off) = read_uvarint(buf, 0)?;
    let mut out: Vec<Vec<u8>> = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (shared, o1) = read_uvarint(buf, off)?;
        let (suffix_len, o2) = read_uvarint(buf, o1)?;
        let shared = shared as usize;
        let end = o2.checked_add(suffix_len as usize)?;
        if end > buf.len() {
            return None;
        }
        let mut e = match out.last() {
            Some(prev) if shared <= prev.len() => prev[..shared].to_vec(),
            None if shared == 0 => Vec::new(),
            _ => return None,
        };
        e.extend_from_slice(&buf[o2..end]);
        out.push(e);
        off = end;
    }
    Some(out)
}
