//! MongoDB table

use crate::{DocumentRules, Operation, OperationKind};
use OperationKind::*;

const fn op(name: &'static str, kind: OperationKind) -> Operation {
    Operation { name, kind }
}

pub static MONGODB: DocumentRules = DocumentRules {
    operations: &[
        op("find", Find),
        op("aggregate", Aggregate),
        op("findOne", BoundedRead),
        op("countDocuments", BoundedRead),
        op("estimatedDocumentCount", BoundedRead),
        op("count", BoundedRead),
        op("distinct", BoundedRead),
        op("insertOne", Write),
        op("insertMany", Write),
        op("insert", Write),
        op("updateOne", Write),
        op("deleteOne", Write),
        op("replaceOne", Write),
        op("findOneAndUpdate", Write),
        op("findOneAndDelete", Write),
        op("findOneAndReplace", Write),
        op("updateMany", FilteredMutation),
        op("deleteMany", FilteredMutation),
        op("update", FilteredMutation),
        op("remove", FilteredMutation),
        op("drop", Destructive),
        op("dropDatabase", Destructive),
        op("dropIndex", Destructive),
        op("dropIndexes", Destructive),
        op("renameCollection", Destructive),
        op("dropUser", Destructive),
        op("dropAllUsers", Destructive),
        op("dropRole", Destructive),
        op("runCommand", Privileged),
        op("adminCommand", Privileged),
        op("eval", Privileged),
        op("createUser", Privileged),
        op("grantRolesToUser", Privileged),
        op("shutdownServer", Privileged),
        op("fsyncLock", Privileged),
        op("createIndex", Privileged),
        op("createCollection", Privileged),
    ],
    commands: &[
        op("find", Find),
        op("aggregate", Aggregate),
        op("count", BoundedRead),
        op("distinct", BoundedRead),
        op("insert", Write),
        op("update", FilteredMutation),
        op("delete", FilteredMutation),
        op("drop", Destructive),
        op("dropDatabase", Destructive),
        op("dropIndexes", Destructive),
        op("renameCollection", Destructive),
        op("dropUser", Destructive),
        op("dropAllUsersFromDatabase", Destructive),
        op("eval", Privileged),
        op("shutdown", Privileged),
        op("createUser", Privileged),
        op("grantRolesToUser", Privileged),
        op("fsync", Privileged),
        op("killOp", Privileged),
        op("setParameter", Privileged),
    ],
    collection_accessors: &["getCollection"],
    database_accessors: &["getSiblingDB"],
    write_stages: &["$out", "$merge"],
    bound_stage: "$limit",
    limit_method: "limit",
    scalar_methods: &["count", "itcount", "size", "explain"],
    script_operators: &["$where", "$function", "$accumulator"],
    script_keywords: &["function"],
    expression_starts: &["db.", "db[", "[", "{"],
};
