//! Static command classification.
//!
//! Every command the router exposes belongs to exactly one
//! [`CommandClass`]. Names are the lowercase protocol names, matched
//! case-sensitively; multi-word commands such as `debug object` are
//! written with a single space and expand to several wire tokens.

use bytes::Bytes;

/// How the router handles a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Routed by its first argument.
    SingleKey,
    /// No routing key; rejected before any network call.
    Unshardable,
    /// `mget`: partitioned per shard, merged back in caller order.
    MultiGet,
    /// `mset`: partitioned by pair key, one confirmation overall.
    MultiSet,
    /// `keys`: sent to every shard, results concatenated.
    Scan,
}

/// Looks up the class of a command name.
///
/// Returns `None` for names outside the table.
pub fn classify(name: &str) -> Option<CommandClass> {
    use CommandClass::*;

    let class = match name {
        "mget" => MultiGet,
        "mset" => MultiSet,
        "keys" => Scan,

        "append" | "bitcount" | "blpop" | "brpop" | "debug object" | "decr" | "decrby" | "del"
        | "dump" | "exists" | "expire" | "expireat" | "get" | "getbit" | "getrange" | "getset"
        | "hdel" | "hexists" | "hget" | "hgetall" | "hincrby" | "hincrbyfloat" | "hkeys"
        | "hlen" | "hmget" | "hmset" | "hset" | "hsetnx" | "hvals" | "incr" | "incrby"
        | "incrbyfloat" | "lindex" | "linsert" | "llen" | "lpop" | "lpush" | "lpushx"
        | "lrange" | "lrem" | "lset" | "ltrim" | "move" | "persist" | "pexpire"
        | "pexpireat" | "psetex" | "pttl" | "rename" | "renamenx" | "restore" | "rpop"
        | "rpush" | "rpushx" | "sadd" | "scard" | "sdiff" | "set" | "setbit" | "setex"
        | "setnx" | "setrange" | "sinter" | "sismember" | "smembers" | "sort" | "spop"
        | "srandmember" | "srem" | "strlen" | "sunion" | "ttl" | "type" | "watch" | "zadd"
        | "zcard" | "zcount" | "zincrby" | "zrange" | "zrangebyscore" | "zrank" | "zrem"
        | "zremrangebyrank" | "zremrangebyscore" | "zrevrange" | "zrevrangebyscore"
        | "zrevrank" | "zscore" => SingleKey,

        // administrative, transactional, scripting, pub/sub and
        // connection-level commands, plus multi-key commands whose keys
        // could span shards
        "auth" | "bgrewriteaof" | "bgsave" | "bitop" | "brpoplpush" | "client kill"
        | "client list" | "client getname" | "client setname" | "config get" | "config set"
        | "config resetstat" | "dbsize" | "debug segfault" | "discard" | "echo" | "eval"
        | "evalsha" | "exec" | "flushall" | "flushdb" | "info" | "lastsave" | "migrate"
        | "monitor" | "msetnx" | "multi" | "object" | "ping" | "psubscribe" | "publish"
        | "punsubscribe" | "quit" | "randomkey" | "rpoplpush" | "save" | "script exists"
        | "script flush" | "script kill" | "script load" | "sdiffstore" | "select"
        | "shutdown" | "sinterstore" | "slaveof" | "slowlog" | "smove" | "subscribe"
        | "sunionstore" | "sync" | "time" | "unsubscribe" | "unwatch" | "zinterstore"
        | "zunionstore" => Unshardable,

        _ => return None,
    };
    Some(class)
}

/// Wire tokens for a command name: `"debug object"` → `DEBUG`, `OBJECT`.
pub fn wire_tokens(name: &str) -> impl Iterator<Item = Bytes> + '_ {
    name.split(' ')
        .map(|word| Bytes::from(word.to_ascii_uppercase()))
}

/// Builds the full request for a command: name tokens followed by args.
pub(crate) fn request<A: AsRef<[u8]>>(name: &str, args: &[A]) -> Vec<Bytes> {
    wire_tokens(name)
        .chain(args.iter().map(|a| Bytes::copy_from_slice(a.as_ref())))
        .collect()
}
